use std::error::Error;
use std::fmt;
use std::sync::Arc;

// The std HashMap/HashSet provide DOS resistance. In this module hash keys are
// `NodeId`s which we allocate ourselves, so this is not a concern. Instead we
// want faster hashing.
use rustc_hash::{FxHashMap, FxHashSet};

#[cfg(test)]
pub mod builder;
mod node;
mod node_id;

pub use node::{
    Attribute, Constant, ConstantNode, DataType, Dimension, Node, NodeIdList, Operator,
    OperatorNode, TypedConstant, ValueNode, ONNX_DOMAIN, ONNX_DOMAIN_ALIAS,
};
pub use node_id::NodeId;

/// Errors reported when a graph operation's preconditions are not met.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphError {
    /// A node ID does not refer to a live node.
    InvalidNodeId(NodeId),

    /// A node ID was expected to refer to an operator.
    NotAnOperator(NodeId),

    /// An operator cannot be replaced by a constant because it does not have
    /// exactly one output.
    MultipleOutputs(NodeId),

    /// An operator cannot be replaced by a constant because its output is
    /// also a graph output.
    GraphOutput(NodeId),

    /// The graph contains a cycle which passes through this operator.
    Cycle(NodeId),
}

impl GraphError {
    /// Return the ID of the node the error refers to.
    pub fn node_id(&self) -> NodeId {
        match self {
            GraphError::InvalidNodeId(id)
            | GraphError::NotAnOperator(id)
            | GraphError::MultipleOutputs(id)
            | GraphError::GraphOutput(id)
            | GraphError::Cycle(id) => *id,
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::InvalidNodeId(id) => write!(f, "node ID {} is invalid", id),
            GraphError::NotAnOperator(id) => write!(f, "node {} is not an operator", id),
            GraphError::MultipleOutputs(id) => {
                write!(f, "operator {} does not have exactly one output", id)
            }
            GraphError::GraphOutput(id) => {
                write!(f, "output of operator {} is a graph output", id)
            }
            GraphError::Cycle(id) => write!(f, "graph has a cycle through operator {}", id),
        }
    }
}

impl Error for GraphError {}

/// A graph defines how to produce output values from a set of dynamic input
/// values and constants, by flowing the inputs through a series of computation
/// steps (operators).
///
/// Graphs consists of three types of node, each of which has a numeric ID and
/// usually a unique name. A node in the graph is either a constant value
/// (an initializer), a dynamically supplied or produced value, or an
/// operator. Operators refer to their inputs and outputs by node ID.
///
/// Nodes are stored in an arena. Removing a node leaves a tombstone in its
/// slot, so IDs of other nodes remain valid and looking up a removed node
/// returns `None`.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,

    /// Map of value node ID => operator node ID which produces the value.
    source_ids: FxHashMap<NodeId, NodeId>,

    /// Map of value or constant node ID => operator node IDs which consume
    /// it. An operator appears once for each input slot that uses the value.
    consumers: FxHashMap<NodeId, Vec<NodeId>>,

    input_ids: Vec<NodeId>,
    output_ids: Vec<NodeId>,
}

impl Graph {
    /// Create a new empty dataflow graph.
    pub fn new() -> Graph {
        Graph::default()
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::from_u32(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    /// Add an operator node to the graph.
    ///
    /// `name` is an identifier for this node that is used in debug messages etc.
    ///
    /// `inputs` specifies which other nodes in the graph should be used as
    /// inputs to this operation. These other nodes can be inputs, constants
    /// or outputs of other operators.
    ///
    /// `outputs` specifies which value nodes the operator's outputs should be
    /// written to. A value can only be produced by one operator.
    ///
    /// Returns the ID of the operator node.
    pub fn add_op(
        &mut self,
        name: Option<&str>,
        op: Operator,
        inputs: &[Option<NodeId>],
        outputs: &[Option<NodeId>],
    ) -> NodeId {
        let op_id = self.push_node(Node::Operator(OperatorNode::new(name, inputs, outputs, op)));

        for &input_id in inputs.iter().flatten() {
            self.consumers.entry(input_id).or_default().push(op_id);
        }

        for &output_id in outputs.iter().flatten() {
            let prev_source = self.source_ids.insert(output_id, op_id);
            assert!(
                prev_source.is_none(),
                "value {} already has a source operator",
                self.node_name(output_id)
            );
        }

        op_id
    }

    /// Add an operator with a single output value to the graph.
    ///
    /// The output value is named `{name}_out`. Returns the IDs of the operator
    /// and output value.
    pub fn add_simple_op(
        &mut self,
        name: &str,
        op: Operator,
        inputs: &[NodeId],
    ) -> (NodeId, NodeId) {
        let output_name = format!("{}_out", name);
        let output_id = self.add_value(Some(&output_name), None, None);
        let inputs: Vec<_> = inputs.iter().copied().map(Some).collect();
        let op_id = self.add_op(Some(name), op, &inputs, &[Some(output_id)]);
        (op_id, output_id)
    }

    /// Add a constant node to the graph.
    ///
    /// `name` is an identifier for this node that is used in debug messages etc.
    ///
    /// Returns the ID of the added node.
    pub fn add_constant<T>(
        &mut self,
        name: Option<&str>,
        shape: &[usize],
        data: impl Into<Arc<[T]>>,
    ) -> NodeId
    where
        Constant: From<ConstantNode<T>>,
    {
        self.add_constant_node(Constant::new(name, shape, data))
    }

    /// Add a constant node to the graph.
    pub fn add_constant_node(&mut self, constant: Constant) -> NodeId {
        self.push_node(Node::Constant(constant))
    }

    /// Add a value node to the graph.
    ///
    /// `name` is an identifier for this node that is used in debug messages etc.
    /// `shape` is the expected shape of the value at runtime, or None if not
    /// known.
    ///
    /// This serves as a placeholder for a value which is available only when
    /// the graph is executed, such as an input or operator output.
    ///
    /// Returns the ID of the added node.
    pub fn add_value(
        &mut self,
        name: Option<&str>,
        shape: Option<Vec<Dimension>>,
        dtype: Option<DataType>,
    ) -> NodeId {
        self.push_node(Node::Value(ValueNode::new(name, shape, dtype)))
    }

    /// Return the debug name for a node.
    pub fn node_name(&self, id: NodeId) -> String {
        self.get_node(id)
            .and_then(|node| node.name())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("[ID: {}]", id))
    }

    /// Retrieve a node by ID.
    ///
    /// Returns `None` if the ID is out of range or the node has been removed.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize()).and_then(|n| n.as_ref())
    }

    /// Retrieve the operator of an operator node for modification.
    ///
    /// Operator inputs and outputs can only be changed via graph-level methods
    /// which keep edge caches up to date.
    pub fn get_operator_mut(&mut self, id: NodeId) -> Option<&mut Operator> {
        match self.nodes.get_mut(id.as_usize()) {
            Some(Some(Node::Operator(op_node))) => Some(op_node.operator_mut()),
            _ => None,
        }
    }

    /// Retrieve a value node for modification (eg. to update shape info).
    pub fn get_value_mut(&mut self, id: NodeId) -> Option<&mut ValueNode> {
        match self.nodes.get_mut(id.as_usize()) {
            Some(Some(Node::Value(value))) => Some(value),
            _ => None,
        }
    }

    /// Find the ID of a live node given its name.
    pub fn get_node_id(&self, name: &str) -> Option<NodeId> {
        self.iter()
            .find_map(|(id, node)| (node.name() == Some(name)).then_some(id))
    }

    /// Iterate over live nodes and their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_ref().map(|n| (NodeId::from_u32(i as u32), n)))
    }

    /// Iterate over operator nodes and their IDs.
    pub fn iter_operators(&self) -> impl Iterator<Item = (NodeId, &OperatorNode)> {
        self.iter()
            .filter_map(|(id, node)| node.as_operator().map(|op| (id, op)))
    }

    /// Return the number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Return the operator node which produces a value, if any.
    ///
    /// Graph inputs and constants have no source operator.
    pub fn get_source_node(&self, value_id: NodeId) -> Option<(NodeId, &OperatorNode)> {
        let op_id = *self.source_ids.get(&value_id)?;
        let op_node = self.get_node(op_id)?.as_operator()?;
        Some((op_id, op_node))
    }

    /// Return the operator which produces the value in input slot `index` of
    /// operator `op_id`.
    pub fn get_input_node(&self, op_id: NodeId, index: usize) -> Option<(NodeId, &OperatorNode)> {
        let op_node = self.get_node(op_id)?.as_operator()?;
        let input_id = op_node.input_ids().get(index).copied().flatten()?;
        self.get_source_node(input_id)
    }

    /// Return the IDs of operators which consume a value or constant.
    ///
    /// An operator appears once for each of its inputs that uses the value.
    pub fn get_consumers(&self, value_id: NodeId) -> Option<&[NodeId]> {
        self.consumers.get(&value_id).map(|c| c.as_slice())
    }

    /// Return the number of operator input edges that read a value.
    pub fn consumer_count(&self, value_id: NodeId) -> usize {
        self.get_consumers(value_id).map_or(0, |c| c.len())
    }

    /// Return the IDs of the graph's input nodes.
    pub fn input_ids(&self) -> &[NodeId] {
        &self.input_ids
    }

    pub fn set_input_ids(&mut self, node_ids: &[NodeId]) {
        self.input_ids = node_ids.to_vec();
    }

    /// Return the IDs of the graph's output nodes.
    pub fn output_ids(&self) -> &[NodeId] {
        &self.output_ids
    }

    pub fn set_output_ids(&mut self, node_ids: &[NodeId]) {
        self.output_ids = node_ids.to_vec();
    }

    /// Return true if a value is one of the graph's outputs.
    pub fn is_output(&self, value_id: NodeId) -> bool {
        self.output_ids.contains(&value_id)
    }

    /// Return the IDs of operator nodes in topological order.
    ///
    /// Each operator appears after all operators that produce its inputs.
    /// Independent operators are ordered by ID, so the order is stable for a
    /// given graph.
    pub fn topo_order(&self) -> Result<Vec<NodeId>, GraphError> {
        #[derive(Copy, Clone, PartialEq)]
        enum VisitState {
            InProgress,
            Done,
        }

        // A helper struct is used as recursive closures are not supported in
        // Rust.
        struct OrderBuilder<'a> {
            graph: &'a Graph,
            state: FxHashMap<NodeId, VisitState>,
            order: Vec<NodeId>,
        }

        impl OrderBuilder<'_> {
            /// Add all the transitive dependencies of `op_id` to the order,
            /// followed by `op_id`.
            fn visit(&mut self, op_id: NodeId, op_node: &OperatorNode) -> Result<(), GraphError> {
                match self.state.get(&op_id) {
                    Some(VisitState::Done) => return Ok(()),
                    Some(VisitState::InProgress) => return Err(GraphError::Cycle(op_id)),
                    None => {}
                }
                self.state.insert(op_id, VisitState::InProgress);

                let graph = self.graph;
                for &input_id in op_node.input_ids().iter().flatten() {
                    if let Some((source_id, source_op)) = graph.get_source_node(input_id) {
                        self.visit(source_id, source_op)?;
                    }
                }

                self.state.insert(op_id, VisitState::Done);
                self.order.push(op_id);
                Ok(())
            }
        }

        let mut builder = OrderBuilder {
            graph: self,
            state: FxHashMap::default(),
            order: Vec::new(),
        };
        for (op_id, op_node) in self.iter_operators() {
            builder.visit(op_id, op_node)?;
        }
        Ok(builder.order)
    }

    /// Replace `old_value_id` with `new_value_id` in operator inputs and graph
    /// outputs.
    pub fn replace_value(&mut self, old_value_id: NodeId, new_value_id: NodeId) {
        for output_id in self.output_ids.iter_mut().filter(|id| **id == old_value_id) {
            *output_id = new_value_id;
        }

        let Some(old_value_op_ids) = self.consumers.remove(&old_value_id) else {
            return;
        };

        let mut updated = FxHashSet::default();
        for &op_id in &old_value_op_ids {
            if !updated.insert(op_id) {
                continue;
            }
            let Some(Some(Node::Operator(op_node))) = self.nodes.get_mut(op_id.as_usize()) else {
                panic!("consumer {} of value {} not found", op_id, old_value_id);
            };
            op_node.replace_input(old_value_id, new_value_id);
        }

        self.consumers
            .entry(new_value_id)
            .or_default()
            .extend(old_value_op_ids);
    }

    /// Remove nodes from the graph.
    ///
    /// Removed operators stop being consumers of their inputs and sources of
    /// their outputs. Removed nodes are also dropped from the graph's input
    /// and output lists. IDs which do not refer to live nodes are ignored.
    pub fn remove_nodes(&mut self, node_ids: &[NodeId]) {
        for &node_id in node_ids {
            let Some(node) = self.nodes.get_mut(node_id.as_usize()).and_then(|n| n.take())
            else {
                continue;
            };

            match node {
                Node::Operator(op_node) => {
                    for input_id in op_node.input_ids().iter().flatten() {
                        if let Some(consumers) = self.consumers.get_mut(input_id) {
                            consumers.retain(|id| *id != node_id);
                            if consumers.is_empty() {
                                self.consumers.remove(input_id);
                            }
                        }
                    }
                    for output_id in op_node.output_ids().iter().flatten() {
                        if self.source_ids.get(output_id) == Some(&node_id) {
                            self.source_ids.remove(output_id);
                        }
                    }
                }
                Node::Constant(_) | Node::Value(_) => {
                    self.consumers.remove(&node_id);
                    self.source_ids.remove(&node_id);
                }
            }
        }

        self.input_ids.retain(|id| !node_ids.contains(id));
        self.output_ids.retain(|id| !node_ids.contains(id));
    }

    /// Check whether [`replace_op_with_constant`](Self::replace_op_with_constant)
    /// would succeed for an operator.
    pub fn can_replace_op_with_constant(&self, op_id: NodeId) -> Result<NodeId, GraphError> {
        let node = self.get_node(op_id).ok_or(GraphError::InvalidNodeId(op_id))?;
        let op_node = node.as_operator().ok_or(GraphError::NotAnOperator(op_id))?;
        let [Some(output_id)] = op_node.output_ids() else {
            return Err(GraphError::MultipleOutputs(op_id));
        };
        if self.is_output(*output_id) {
            return Err(GraphError::GraphOutput(op_id));
        }
        Ok(*output_id)
    }

    /// Replace an operator and its output value with a constant.
    ///
    /// All consumers of the operator's output are rewired to the new constant.
    /// The operator must have exactly one output, which must not be a graph
    /// output. The operator's inputs are left in place even if they become
    /// unused.
    ///
    /// Returns the ID of the new constant node.
    pub fn replace_op_with_constant(
        &mut self,
        op_id: NodeId,
        constant: Constant,
    ) -> Result<NodeId, GraphError> {
        let output_id = self.can_replace_op_with_constant(op_id)?;
        let const_id = self.add_constant_node(constant);
        self.replace_value(output_id, const_id);
        self.remove_nodes(&[op_id, output_id]);
        Ok(const_id)
    }
}

#[cfg(test)]
mod tests;
