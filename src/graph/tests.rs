use rten_testing::TestCases;

use super::{Constant, Graph, GraphError, Node, NodeId, Operator};

/// Build the graph `x -> Shape -> Gather(0) -> Unsqueeze -> out` and return it
/// together with the IDs of the operators, in order.
fn shape_chain_graph() -> (Graph, [NodeId; 3]) {
    let mut graph = Graph::new();
    let x = graph.add_value(Some("x"), None, None);
    let (shape_op, shape_out) = graph.add_simple_op("shape", Operator::new("Shape", 1), &[x]);
    let index = graph.add_constant(Some("index"), &[], vec![0i64]);
    let (gather_op, gather_out) =
        graph.add_simple_op("gather", Operator::new("Gather", 11), &[shape_out, index]);
    let (unsqueeze_op, unsqueeze_out) =
        graph.add_simple_op("unsqueeze", Operator::new("Unsqueeze", 11), &[gather_out]);
    graph.set_input_ids(&[x]);
    graph.set_output_ids(&[unsqueeze_out]);
    (graph, [shape_op, gather_op, unsqueeze_op])
}

#[test]
fn test_edge_caches() {
    let (graph, [shape_op, gather_op, unsqueeze_op]) = shape_chain_graph();

    let shape_out = graph.get_node_id("shape_out").unwrap();
    assert_eq!(graph.get_source_node(shape_out).map(|(id, _)| id), Some(shape_op));
    assert_eq!(graph.get_consumers(shape_out), Some([gather_op].as_slice()));

    let (input_op, _) = graph.get_input_node(unsqueeze_op, 0).unwrap();
    assert_eq!(input_op, gather_op);
    assert!(graph.get_input_node(unsqueeze_op, 1).is_none());

    // Graph inputs and constants have no source.
    let x = graph.input_ids()[0];
    assert!(graph.get_source_node(x).is_none());
    let index = graph.get_node_id("index").unwrap();
    assert!(graph.get_source_node(index).is_none());
    assert_eq!(graph.consumer_count(index), 1);
}

#[test]
fn test_consumer_count_counts_each_input_slot() {
    let mut graph = Graph::new();
    let x = graph.add_value(Some("x"), None, None);
    graph.add_simple_op("mul", Operator::new("Mul", 7), &[x, x]);
    assert_eq!(graph.consumer_count(x), 2);
}

#[test]
fn test_topo_order() {
    let mut graph = Graph::new();
    let x = graph.add_value(Some("x"), None, None);
    let a_out = graph.add_value(Some("a_out"), None, None);
    let b_out = graph.add_value(Some("b_out"), None, None);

    // Add the consumer before the producer, so that ID order is not a valid
    // topological order.
    let b_op = graph.add_op(
        Some("b"),
        Operator::new("Relu", 6),
        &[Some(a_out)],
        &[Some(b_out)],
    );
    let a_op = graph.add_op(Some("a"), Operator::new("Relu", 6), &[Some(x)], &[Some(a_out)]);

    assert_eq!(graph.topo_order(), Ok(vec![a_op, b_op]));
}

#[test]
fn test_topo_order_cycle() {
    let mut graph = Graph::new();
    let a_out = graph.add_value(Some("a_out"), None, None);
    let b_out = graph.add_value(Some("b_out"), None, None);
    let a_op = graph.add_op(Some("a"), Operator::new("Relu", 6), &[Some(b_out)], &[Some(a_out)]);
    graph.add_op(Some("b"), Operator::new("Relu", 6), &[Some(a_out)], &[Some(b_out)]);

    assert_eq!(graph.topo_order(), Err(GraphError::Cycle(a_op)));
}

#[test]
fn test_remove_nodes() {
    let (mut graph, [shape_op, gather_op, _]) = shape_chain_graph();
    let node_count = graph.node_count();
    let shape_out = graph.get_node_id("shape_out").unwrap();
    let x = graph.input_ids()[0];

    graph.remove_nodes(&[gather_op]);

    // The removed node is tombstoned and other IDs remain valid.
    assert!(graph.get_node(gather_op).is_none());
    assert!(graph.get_node(shape_op).is_some());
    assert_eq!(graph.node_count(), node_count - 1);

    // Edges from and to the removed node are gone.
    assert_eq!(graph.consumer_count(shape_out), 0);
    let gather_out = graph.get_node_id("gather_out").unwrap();
    assert!(graph.get_source_node(gather_out).is_none());
    assert_eq!(graph.consumer_count(x), 1);

    // Removing an already-removed node is a no-op.
    graph.remove_nodes(&[gather_op]);
    assert_eq!(graph.node_count(), node_count - 1);
}

#[test]
fn test_replace_value() {
    let (mut graph, [_, gather_op, _]) = shape_chain_graph();
    let index = graph.get_node_id("index").unwrap();
    let new_index = graph.add_constant(Some("new_index"), &[], vec![1i64]);

    graph.replace_value(index, new_index);

    let gather = graph.get_node(gather_op).unwrap().as_operator().unwrap();
    assert_eq!(gather.input_ids()[1], Some(new_index));
    assert_eq!(graph.consumer_count(index), 0);
    assert_eq!(graph.get_consumers(new_index), Some([gather_op].as_slice()));
}

#[test]
fn test_replace_op_with_constant() {
    let (mut graph, [_, gather_op, unsqueeze_op]) = shape_chain_graph();
    let gather_out = graph.get_node_id("gather_out").unwrap();

    let constant = Constant::new(Some("gather_out"), &[], vec![3i64]);
    let const_id = graph.replace_op_with_constant(gather_op, constant).unwrap();

    assert!(graph.get_node(gather_op).is_none());
    assert!(graph.get_node(gather_out).is_none());
    assert_eq!(graph.get_node_id("gather_out"), Some(const_id));
    assert!(matches!(graph.get_node(const_id), Some(Node::Constant(_))));

    let unsqueeze = graph.get_node(unsqueeze_op).unwrap().as_operator().unwrap();
    assert_eq!(unsqueeze.input_ids(), [Some(const_id)]);
    assert_eq!(graph.get_consumers(const_id), Some([unsqueeze_op].as_slice()));
}

#[test]
fn test_replace_op_with_constant_errors() {
    #[derive(Debug)]
    struct Case {
        node: &'static str,
        graph_output: bool,
    }

    let cases = [
        // Output of the final op is a graph output.
        Case {
            node: "unsqueeze",
            graph_output: true,
        },
        // Not an operator.
        Case {
            node: "index",
            graph_output: false,
        },
    ];

    cases.test_each(|case| {
        let (mut graph, _) = shape_chain_graph();
        let node_id = graph.get_node_id(case.node).unwrap();
        let node_count = graph.node_count();
        let constant = Constant::new(None, &[], vec![0i64]);

        let result = graph.replace_op_with_constant(node_id, constant);

        let expected = if case.graph_output {
            GraphError::GraphOutput(node_id)
        } else {
            GraphError::NotAnOperator(node_id)
        };
        assert_eq!(result, Err(expected));
        assert_eq!(graph.node_count(), node_count);
    });
}

#[test]
fn test_replace_op_with_multiple_outputs() {
    let mut graph = Graph::new();
    let x = graph.add_value(Some("x"), None, None);
    let a = graph.add_value(Some("a"), None, None);
    let b = graph.add_value(Some("b"), None, None);
    let split_op = graph.add_op(
        Some("split"),
        Operator::new("Split", 11),
        &[Some(x)],
        &[Some(a), Some(b)],
    );

    assert_eq!(
        graph.can_replace_op_with_constant(split_op),
        Err(GraphError::MultipleOutputs(split_op))
    );

    let removed = NodeId::from_u32(1000);
    assert_eq!(
        graph.can_replace_op_with_constant(removed),
        Err(GraphError::InvalidNodeId(removed))
    );
}
