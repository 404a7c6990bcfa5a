//! Fusion which replaces a computed `Reshape` target shape with a constant.
//!
//! Models exported with dynamic shapes often compute the `shape` input of a
//! `Reshape` at runtime, by concatenating constants with dimensions read from
//! the tensor being reshaped:
//!
//! ```text
//!          x
//!       /  |       \
//!      |  Shape     Shape
//!      |   |          |
//!      |  Gather(0)  Gather(1)   [-1]
//!      |   |          |          /
//!      |  Unsqueeze  Unsqueeze  /
//!      |      \       |        /
//!      |           Concat
//!       \          /
//!         Reshape
//! ```
//!
//! `Reshape` treats `0` in the target shape as "copy this dimension from the
//! input", so the `Concat` output above can be replaced by the constant
//! `[0, 0, -1]`, after which the shape computation is dead.

use crate::graph::{Constant, Dimension, Graph, Node, NodeId, OperatorNode};

use super::pattern_matcher::{find_path, Direction, OpMatcher, PathStep};

/// Matches the supported versions of `Reshape`.
pub const RESHAPE: OpMatcher = OpMatcher::new("Reshape", &[5]);

const CONCAT: OpMatcher = OpMatcher::new("Concat", &[1, 4, 11]);
const UNSQUEEZE: OpMatcher = OpMatcher::new("Unsqueeze", &[1, 11]);
const GATHER: OpMatcher = OpMatcher::new("Gather", &[1, 11]);
const SHAPE: OpMatcher = OpMatcher::new("Shape", &[1]);

/// Target shape entry which copies the corresponding input dimension.
pub const COPY_DIM: i64 = 0;

/// Target shape entry whose size is inferred from the element count.
pub const INFER_DIM: i64 = -1;

/// Reasons why a fusion was not created.
#[derive(Debug, PartialEq)]
pub enum FusionError {
    /// The node being tested is not the start of the fusion's pattern.
    NoMatch,
    /// The pattern matched, but a precondition failed.
    CheckFailed(&'static str),
}

/// Contribution of one `Concat` input to a `Reshape` target shape.
#[derive(Clone, Debug, PartialEq)]
pub enum SlotValue {
    /// Values of a constant integer vector.
    Literal(Vec<i64>),
    /// A dimension of the reshaped tensor, extracted at the same position it
    /// occupies in the target shape.
    CopyDim,
    /// A runtime-computed vector which shape inference says has one element.
    Inferred,
    /// An input which could not be characterized.
    Unmatched,
}

impl SlotValue {
    /// Return the number of target shape entries this slot produces.
    pub fn len(&self) -> usize {
        match self {
            SlotValue::Literal(values) => values.len(),
            SlotValue::CopyDim | SlotValue::Inferred => 1,
            SlotValue::Unmatched => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Combine the contributions of each `Concat` input into a target shape.
///
/// Fails if any slot is unmatched, or if the resulting shape contains more
/// than one `-1`, which `Reshape` does not allow.
pub fn compose_shape_value(slots: &[SlotValue]) -> Result<Vec<i64>, FusionError> {
    let mut shape = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            SlotValue::Literal(values) => shape.extend_from_slice(values),
            SlotValue::CopyDim => shape.push(COPY_DIM),
            SlotValue::Inferred => shape.push(INFER_DIM),
            SlotValue::Unmatched => {
                return Err(FusionError::CheckFailed("concat input not matched"));
            }
        }
    }

    if shape.iter().filter(|&&size| size == INFER_DIM).count() > 1 {
        return Err(FusionError::CheckFailed("multiple inferred dimensions"));
    }

    Ok(shape)
}

/// Additional graph querying methods used by the fusion.
trait GraphQuery {
    /// Return the values of a 1D integer constant, widened to `i64`.
    fn get_int_vector(&self, node_id: NodeId) -> Option<Vec<i64>>;

    /// Return the value of an integer constant with a single element.
    fn get_int_scalar(&self, node_id: NodeId) -> Option<i64>;

    /// Return true if shape information shows that a node is a vector with
    /// exactly one element.
    fn is_single_element_vector(&self, node_id: NodeId) -> bool;
}

impl GraphQuery for Graph {
    fn get_int_vector(&self, node_id: NodeId) -> Option<Vec<i64>> {
        match self.get_node(node_id)? {
            Node::Constant(constant) if constant.ndim() == 1 => constant.to_i64_vec(),
            _ => None,
        }
    }

    fn get_int_scalar(&self, node_id: NodeId) -> Option<i64> {
        self.get_node(node_id)?.as_constant()?.as_scalar_i64()
    }

    fn is_single_element_vector(&self, node_id: NodeId) -> bool {
        self.get_node(node_id)
            .and_then(|node| node.shape())
            .is_some_and(|shape| matches!(&*shape, [Dimension::Fixed(1)]))
    }
}

/// Test if input `index` of a `Concat` node is produced by the chain
/// `root -> Shape -> Gather -> Unsqueeze`, which extracts dimension
/// `shape_len` of `root` as a 1D tensor.
///
/// `shape_len` is the number of target shape entries produced by the
/// preceding inputs, so a match means the dimension lands in the same
/// position in the target shape as in `root`.
pub fn match_dim_extraction(
    graph: &Graph,
    root_id: NodeId,
    concat_id: NodeId,
    index: usize,
    shape_len: usize,
) -> bool {
    let steps = [
        PathStep::new(index, UNSQUEEZE),
        PathStep::new(0, GATHER),
        PathStep::new(0, SHAPE),
    ];
    let Some(path) = find_path(graph, concat_id, Direction::Upstream, &steps) else {
        return false;
    };
    let &[unsqueeze_id, gather_id, shape_id] = path.as_slice() else {
        return false;
    };

    let get_op = |id| graph.get_node(id).and_then(|n| n.as_operator());
    let (Some(unsqueeze), Some(gather), Some(shape)) =
        (get_op(unsqueeze_id), get_op(gather_id), get_op(shape_id))
    else {
        return false;
    };

    if shape.input_ids().first().copied().flatten() != Some(root_id) {
        return false;
    }

    if unsqueeze.operator().get_ints("axes") != Some([0].as_slice()) {
        return false;
    }

    let index_value = gather
        .input_ids()
        .get(1)
        .copied()
        .flatten()
        .and_then(|id| graph.get_int_scalar(id));
    index_value == Some(shape_len as i64)
}

/// Determine how input `index` of a `Concat` node contributes to the target
/// shape of a `Reshape` whose data input is `root_id`.
pub fn classify_concat_input(
    graph: &Graph,
    root_id: NodeId,
    concat_id: NodeId,
    concat: &OperatorNode,
    index: usize,
    shape_len: usize,
) -> SlotValue {
    let Some(input_id) = concat.input_ids().get(index).copied().flatten() else {
        return SlotValue::Unmatched;
    };

    if let Some(values) = graph.get_int_vector(input_id) {
        SlotValue::Literal(values)
    } else if match_dim_extraction(graph, root_id, concat_id, index, shape_len) {
        SlotValue::CopyDim
    } else if graph.is_single_element_vector(input_id) {
        SlotValue::Inferred
    } else {
        SlotValue::Unmatched
    }
}

/// A planned replacement of a `Concat` node with a constant target shape.
#[derive(Debug, PartialEq)]
pub struct ShapeFusion {
    /// The `Concat` operator to replace.
    pub concat_id: NodeId,

    /// Name of the `Concat` output, which is re-used for the constant.
    pub output_name: Option<String>,

    /// The composed target shape.
    pub shape: Vec<i64>,
}

impl ShapeFusion {
    /// Create the constant which replaces the `Concat` output.
    pub fn to_constant(&self) -> Constant {
        Constant::new(
            self.output_name.as_deref(),
            &[self.shape.len()],
            self.shape.clone(),
        )
    }
}

/// Replaces the `Concat` node which computes the target shape of a `Reshape`
/// with a constant.
pub struct ReshapeFusion {}

impl ReshapeFusion {
    /// Test whether the target shape of a `Reshape` operator can be computed
    /// ahead of time and return a plan for the replacement if so.
    ///
    /// This does not modify the graph.
    pub fn maybe_fuse(
        &self,
        graph: &Graph,
        reshape_id: NodeId,
        reshape: &OperatorNode,
    ) -> Result<ShapeFusion, FusionError> {
        if !RESHAPE.matches(reshape.operator()) {
            return Err(FusionError::NoMatch);
        }

        let root_id = reshape
            .input_ids()
            .first()
            .copied()
            .flatten()
            .ok_or(FusionError::NoMatch)?;
        let (concat_id, concat) = graph
            .get_input_node(reshape_id, 1)
            .ok_or(FusionError::NoMatch)?;
        if !CONCAT.matches(concat.operator()) {
            return Err(FusionError::NoMatch);
        }

        // The `Concat` node is removed by the fusion, so the `Reshape` must
        // be its only consumer.
        let &[Some(concat_output)] = concat.output_ids() else {
            return Err(FusionError::CheckFailed("wrong output count"));
        };
        if graph.consumer_count(concat_output) != 1 || graph.is_output(concat_output) {
            return Err(FusionError::CheckFailed("concat output has other consumers"));
        }

        let mut slots = Vec::with_capacity(concat.input_ids().len());
        let mut shape_len = 0;
        for index in 0..concat.input_ids().len() {
            let slot = classify_concat_input(graph, root_id, concat_id, concat, index, shape_len);
            if slot == SlotValue::Unmatched {
                return Err(FusionError::CheckFailed("concat input not matched"));
            }
            shape_len += slot.len();
            slots.push(slot);
        }
        let shape = compose_shape_value(&slots)?;

        Ok(ShapeFusion {
            concat_id,
            output_name: graph
                .get_node(concat_output)
                .and_then(|n| n.name())
                .map(|name| name.to_string()),
            shape,
        })
    }
}
