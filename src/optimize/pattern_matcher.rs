//! Matching of linear operator chains.

use crate::graph::{Graph, NodeId, Operator, ONNX_DOMAIN, ONNX_DOMAIN_ALIAS};

/// Matches an operator by type, schema version and domain.
#[derive(Clone, Debug, PartialEq)]
pub struct OpMatcher {
    /// Operator type (eg. "Gather").
    op_type: &'static str,

    /// Accepted schema versions.
    versions: &'static [u32],

    domain: &'static str,
}

impl OpMatcher {
    /// Create a matcher for an operator in the ONNX domain.
    pub const fn new(op_type: &'static str, versions: &'static [u32]) -> OpMatcher {
        OpMatcher {
            op_type,
            versions,
            domain: ONNX_DOMAIN,
        }
    }

    pub const fn with_domain(mut self, domain: &'static str) -> OpMatcher {
        self.domain = domain;
        self
    }

    pub fn op_type(&self) -> &'static str {
        self.op_type
    }

    /// Test if an operator has the expected type, one of the accepted versions
    /// and the expected domain.
    pub fn matches(&self, op: &Operator) -> bool {
        op.op_type() == self.op_type
            && self.versions.contains(&op.version())
            && domains_match(op.domain(), self.domain)
    }
}

/// Test if an operator's domain matches an expected domain, treating the
/// alternate name for the ONNX domain as equivalent.
fn domains_match(actual: &str, expected: &str) -> bool {
    actual == expected || (expected == ONNX_DOMAIN && actual == ONNX_DOMAIN_ALIAS)
}

/// Direction in which to follow edges when matching a chain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Direction {
    /// Follow edges from operators to the producers of their inputs.
    Upstream,
    /// Follow edges from operators to the consumers of their outputs.
    Downstream,
}

/// One hop of an operator chain.
#[derive(Clone, Debug, PartialEq)]
pub struct PathStep {
    /// Input slot which connects the two operators of this hop.
    ///
    /// When matching upstream this is the input slot of the current operator
    /// whose producer is the next operator. When matching downstream it is
    /// the input slot of the next operator that reads the current one's output.
    input_index: usize,

    op: OpMatcher,
}

impl PathStep {
    pub const fn new(input_index: usize, op: OpMatcher) -> PathStep {
        PathStep { input_index, op }
    }
}

/// Match a chain of operators starting from the operator `start`.
///
/// Each hop moves from the current operator to a neighbor connected via the
/// step's input slot, and checks it against the step's operator matcher.
///
/// Returns the IDs of the matched operators, ordered from nearest to
/// farthest from `start`, or `None` if any hop fails. The starting operator
/// is not included.
pub fn find_path(
    graph: &Graph,
    start: NodeId,
    direction: Direction,
    steps: &[PathStep],
) -> Option<Vec<NodeId>> {
    let mut path = Vec::with_capacity(steps.len());
    let mut current = start;

    for step in steps {
        let next = match direction {
            Direction::Upstream => {
                let (source_id, source_op) = graph.get_input_node(current, step.input_index)?;
                step.op.matches(source_op.operator()).then_some(source_id)?
            }
            Direction::Downstream => find_consumer(graph, current, step)?,
        };
        path.push(next);
        current = next;
    }

    Some(path)
}

/// Find an operator which reads an output of `op_id` in input slot
/// `step.input_index` and matches `step.op`.
fn find_consumer(graph: &Graph, op_id: NodeId, step: &PathStep) -> Option<NodeId> {
    let op_node = graph.get_node(op_id)?.as_operator()?;
    op_node
        .output_ids()
        .iter()
        .flatten()
        .flat_map(|&output_id| {
            graph
                .get_consumers(output_id)
                .unwrap_or_default()
                .iter()
                .map(move |&consumer_id| (output_id, consumer_id))
        })
        .find_map(|(output_id, consumer_id)| {
            let consumer = graph.get_node(consumer_id)?.as_operator()?;
            let reads_output =
                consumer.input_ids().get(step.input_index).copied().flatten() == Some(output_id);
            (reads_output && step.op.matches(consumer.operator())).then_some(consumer_id)
        })
}
