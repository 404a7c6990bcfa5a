//! Tools to simplify building graphs in tests.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use crate::graph::{Constant, ConstantNode, DataType, Dimension, Graph, NodeId, Operator};

enum ExprKind {
    /// Expression representing a value node.
    Value(ValueExpr),
    /// Expression representing a constant node.
    Constant(Constant),
    /// Expression representing the output of an operator node.
    Operator(OperatorExpr),
}

/// An expression describing a [`Graph`].
///
/// Expressions are constructed using constructor methods and then converted
/// into a graph using [`Expr::build_graph`]. The following builds a graph
/// which reads the first dimension of `x` as a 1D tensor:
///
/// ```text
/// let x = Expr::value("x");
/// let dim = x
///     .unary(Operator::new("Shape", 1))
///     .binary(Operator::new("Gather", 11), Expr::constant(&[], vec![0i64]));
/// let graph: Graph = dim.build_graph(["x"]);
/// ```
///
/// Expressions which are re-used (by cloning) are added to the graph only
/// once.
#[derive(Clone)]
pub struct Expr {
    kind: Rc<ExprKind>,
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Expr {
        Expr { kind: kind.into() }
    }
}

impl Expr {
    /// Create an expression representing a runtime-computed value (eg. model
    /// inputs).
    pub fn value(name: &str) -> Expr {
        Expr::from(ExprKind::Value(ValueExpr {
            name: name.to_string(),
            dtype: None,
            shape: None,
        }))
    }

    /// Create an expression representing a runtime-computed value (eg. model
    /// inputs), with shape and dtype information.
    pub fn value_with_info(name: &str, dtype: DataType, shape: &[Dimension]) -> Expr {
        Expr::from(ExprKind::Value(ValueExpr {
            name: name.to_string(),
            dtype: Some(dtype),
            shape: Some(shape.to_vec()),
        }))
    }

    /// Create an expression representing a constant value.
    ///
    /// The constant is given a generated name when added to a graph.
    pub fn constant<T>(shape: &[usize], data: impl Into<Arc<[T]>>) -> Expr
    where
        Constant: From<ConstantNode<T>>,
    {
        Expr::from(ExprKind::Constant(Constant::new(None, shape, data)))
    }

    /// Create an expression which applies a unary operator to this expression.
    pub fn unary(&self, op: Operator) -> Expr {
        self.apply(op, &[], OutputMeta::NoMeta)
    }

    /// Create an expression which applies a binary operator to this expression.
    pub fn binary(&self, op: Operator, rhs: Expr) -> Expr {
        self.apply(op, &[rhs], OutputMeta::NoMeta)
    }

    /// Create an expression which applies an operator to this expression.
    ///
    /// `self` becomes the first input, followed by `operands`. `output`
    /// specifies the shape and type of the operator's output, if known.
    pub fn apply(&self, op: Operator, operands: &[Expr], output: OutputMeta) -> Expr {
        let mut inputs: Vec<_> = [self.clone()].into();
        inputs.extend(operands.iter().cloned());
        Expr::from(ExprKind::Operator(OperatorExpr {
            op,
            inputs,
            output,
        }))
    }

    /// Convert this expression into a graph.
    ///
    /// The inputs of the graph are values with names listed in `inputs`. The
    /// output is the node that corresponds to the result of the `self`
    /// expression.
    pub fn build_graph<'a, I: AsRef<[&'a str]>>(self, inputs: I) -> Graph {
        let mut graph = Graph::new();
        let mut expr_output_ids = HashMap::new();
        let mut name_gen = NodeNameGenerator::new();
        let output_id = self.add_to_graph(&mut graph, &mut name_gen, &mut expr_output_ids);

        let input_ids: Vec<NodeId> = inputs
            .as_ref()
            .iter()
            .map(|name| {
                graph
                    .get_node_id(name)
                    .expect("input name passed to `build_graph` not found in graph")
            })
            .collect();
        graph.set_input_ids(&input_ids);
        graph.set_output_ids(&[output_id]);

        graph
    }

    /// Create a graph with the given inputs and outputs.
    pub fn make_graph<I: AsRef<[Expr]>, O: AsRef<[Expr]>>(inputs: I, outputs: O) -> Graph {
        let mut graph = Graph::new();
        let mut expr_output_ids = HashMap::new();
        let mut name_gen = NodeNameGenerator::new();

        let mut add_unique = |graph: &mut Graph, exprs: &[Expr]| {
            let mut ids = Vec::new();
            for expr in exprs {
                let id = expr.add_to_graph(graph, &mut name_gen, &mut expr_output_ids);
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            ids
        };

        let output_ids = add_unique(&mut graph, outputs.as_ref());
        let input_ids = add_unique(&mut graph, inputs.as_ref());
        graph.set_input_ids(&input_ids);
        graph.set_output_ids(&output_ids);

        graph
    }

    fn add_to_graph(
        &self,
        graph: &mut Graph,
        name_gen: &mut NodeNameGenerator,
        expr_output_ids: &mut HashMap<ExprRef, NodeId>,
    ) -> NodeId {
        if let Some(node_id) = expr_output_ids.get(&ExprRef(self.clone())) {
            return *node_id;
        }

        let output_id = match self.kind.as_ref() {
            ExprKind::Value(value_info) => graph.add_value(
                Some(value_info.name.as_str()),
                value_info.shape.clone(),
                value_info.dtype,
            ),
            ExprKind::Constant(value) => {
                let name = name_gen.generate("const");
                graph.add_constant_node(value.with_name(Some(name.as_str())))
            }
            ExprKind::Operator(op_info) => {
                let op_inputs: Vec<_> = op_info
                    .inputs
                    .iter()
                    .map(|input_expr| {
                        Some(input_expr.add_to_graph(graph, name_gen, expr_output_ids))
                    })
                    .collect();

                let op_type = op_info.op.op_type();
                let output_name = name_gen.generate(&format!("{}_out", op_type));
                let (output_dtype, output_shape) = match &op_info.output {
                    OutputMeta::NoMeta => (None, None),
                    OutputMeta::Meta((dtype, shape)) => (Some(*dtype), Some(shape.clone())),
                };
                let output_id =
                    graph.add_value(Some(output_name.as_str()), output_shape, output_dtype);

                let op_name = name_gen.generate(op_type);
                graph.add_op(
                    Some(op_name.as_str()),
                    op_info.op.clone(),
                    &op_inputs,
                    &[Some(output_id)],
                );

                output_id
            }
        };
        expr_output_ids.insert(ExprRef(self.clone()), output_id);

        output_id
    }
}

/// Wrapper around an `Expr` which uses reference-equality.
struct ExprRef(Expr);

impl PartialEq for ExprRef {
    fn eq(&self, other: &ExprRef) -> bool {
        Rc::ptr_eq(&self.0.kind, &other.0.kind)
    }
}

impl Eq for ExprRef {}

impl Hash for ExprRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0.kind).hash(state)
    }
}

/// Metadata about an operator output value.
#[derive(Clone)]
pub enum OutputMeta {
    /// Value without dtype or shape info.
    NoMeta,
    /// Value with dtype and shape info.
    Meta((DataType, Vec<Dimension>)),
}

struct OperatorExpr {
    op: Operator,
    inputs: Vec<Expr>,
    output: OutputMeta,
}

struct ValueExpr {
    name: String,
    dtype: Option<DataType>,
    shape: Option<Vec<Dimension>>,
}

struct NodeNameGenerator {
    used_names: HashSet<String>,
}

impl NodeNameGenerator {
    fn new() -> NodeNameGenerator {
        NodeNameGenerator {
            used_names: HashSet::new(),
        }
    }

    fn generate(&mut self, prefix: &str) -> String {
        let mut name = prefix.to_string();
        let mut suffix = 0;
        while self.used_names.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", prefix, suffix);
        }
        self.used_names.insert(name.clone());
        name
    }
}

/// Create a [`Dimension`] array from a list of symbolic names and fixed sizes.
macro_rules! dims {
    ($($x:expr),* $(,)?) => {
        [$(crate::graph::Dimension::from($x)),*]
    };
}
pub(crate) use dims;

#[cfg(test)]
mod tests {
    use super::{Expr, OutputMeta};
    use crate::graph::{DataType, Node, Operator};

    #[test]
    fn test_build_graph() {
        // Build an expression featuring values, operators and constants,
        // including re-use of the same expression (`shape`).
        let x = Expr::value_with_info("x", DataType::Float, &dims!["batch", 4]);
        let shape = x.unary(Operator::new("Shape", 1));
        let dim_0 = shape.binary(Operator::new("Gather", 11), Expr::constant(&[], vec![0i64]));
        let dim_1 = shape.binary(Operator::new("Gather", 11), Expr::constant(&[], vec![1i64]));
        let sum = dim_0.apply(
            Operator::new("Add", 7),
            &[dim_1],
            OutputMeta::Meta((DataType::Int64, Vec::new())),
        );
        let graph = sum.build_graph(["x"]);

        let ops: Vec<_> = graph
            .iter_operators()
            .map(|(_, op)| op.operator().op_type().to_string())
            .collect();
        assert_eq!(ops, ["Shape", "Gather", "Gather", "Add"]);

        let input = graph.input_ids()[0];
        assert_eq!(graph.node_name(input), "x");
        assert_eq!(graph.consumer_count(input), 1);

        let output = graph.output_ids()[0];
        let Some(Node::Value(output_val)) = graph.get_node(output) else {
            panic!("output is not a value");
        };
        assert_eq!(output_val.ndim(), Some(0));
        assert!(graph.get_source_node(output).is_some());
    }
}
