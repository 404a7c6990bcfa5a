//! rten-shape-fusion simplifies machine learning model graphs by replacing
//! runtime computations of `Reshape` target shapes with constants.
//!
//! Models exported from training frameworks frequently compute the target
//! shape of a `Reshape` from the shape of its input, using a chain of
//! `Shape`, `Gather`, `Unsqueeze` and `Concat` operators. Because `Reshape`
//! interprets a `0` in the target shape as "copy this dimension from the
//! input" and `-1` as "infer this dimension", such computations can often be
//! replaced with a constant vector, which removes the shape computation from
//! the graph entirely.
//!
//! # Usage
//!
//! Build or load a [`Graph`], then run [`GraphOptimizer::optimize`] on it:
//!
//! ```
//! use rten_shape_fusion::{Attribute, Graph, GraphOptimizer, Operator, OptimizeOptions};
//!
//! let mut graph = Graph::new();
//! let x = graph.add_value(Some("x"), None, None);
//!
//! // Compute `concat([unsqueeze(shape(x)[0]), [-1]])`.
//! let (_, shape) = graph.add_simple_op("shape", Operator::new("Shape", 1), &[x]);
//! let index = graph.add_constant(Some("index"), &[], vec![0i64]);
//! let (_, dim) = graph.add_simple_op("gather", Operator::new("Gather", 11), &[shape, index]);
//! let unsqueeze = Operator::new("Unsqueeze", 11).with_attr("axes", Attribute::Ints(vec![0]));
//! let (_, dim) = graph.add_simple_op("unsqueeze", unsqueeze, &[dim]);
//! let rest = graph.add_constant(Some("rest"), &[1], vec![-1i64]);
//! let (_, target) = graph.add_simple_op("concat", Operator::new("Concat", 11), &[dim, rest]);
//!
//! let (_, output) = graph.add_simple_op("reshape", Operator::new("Reshape", 5), &[x, target]);
//! graph.set_input_ids(&[x]);
//! graph.set_output_ids(&[output]);
//!
//! let modified = GraphOptimizer::new().optimize(&mut graph, &OptimizeOptions::default())?;
//! assert!(modified);
//!
//! // The target shape is now the constant `[0, -1]`.
//! let target = graph.get_node_id("concat_out").unwrap();
//! let shape = graph.get_node(target).and_then(|n| n.as_constant()).unwrap();
//! assert_eq!(shape.to_i64_vec(), Some(vec![0, -1]));
//! # Ok::<_, rten_shape_fusion::OptimizeError>(())
//! ```
//!
//! # Crate features
//!
//! - `serde` implements `Serialize` and `Deserialize` for
//!   [`OptimizeOptions`] and [`DiagnosticLevel`].

mod graph;
mod optimize;

pub use graph::{
    Attribute, Constant, ConstantNode, DataType, Dimension, Graph, GraphError, Node, NodeId,
    NodeIdList, Operator, OperatorNode, TypedConstant, ValueNode, ONNX_DOMAIN, ONNX_DOMAIN_ALIAS,
};
pub use optimize::{
    classify_concat_input, compose_shape_value, find_path, match_dim_extraction,
    DiagnosticLevel, Direction, FusionError, GraphOptimizer, OpMatcher, OptimizeError,
    OptimizeOptions, PathStep, ReshapeFusion, ShapeFusion, SlotValue,
};
