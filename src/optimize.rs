use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::graph::{Constant, Graph, Node, NodeId};

mod diagnostics;
mod pattern_matcher;
mod reshape_fusion;

pub use diagnostics::DiagnosticLevel;
pub use pattern_matcher::{find_path, Direction, OpMatcher, PathStep};
pub use reshape_fusion::{
    classify_concat_input, compose_shape_value, match_dim_extraction, FusionError, ReshapeFusion,
    ShapeFusion, SlotValue,
};

use diagnostics::Diagnostics;
use reshape_fusion::RESHAPE;

/// Errors that occur while applying graph optimizations.
#[derive(Debug, PartialEq)]
pub enum OptimizeError {
    /// The graph could not be sorted topologically because it contains a
    /// cycle passing through the named node.
    Cycle { node: String },

    /// Optimizing a subgraph owned by the named node failed.
    Subgraph {
        node: String,
        error: Box<OptimizeError>,
    },
}

impl Display for OptimizeError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Cycle { node } => write!(f, "graph contains a cycle through node \"{}\"", node),
            Self::Subgraph { node, error } => {
                write!(f, "failed to optimize subgraph of node \"{}\": {}", node, error)
            }
        }
    }
}

impl Error for OptimizeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Cycle { .. } => None,
            Self::Subgraph { error, .. } => Some(error.as_ref()),
        }
    }
}

/// Configuration for [`GraphOptimizer::optimize`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct OptimizeOptions {
    /// Execution providers whose operators may be rewritten. If empty,
    /// operators assigned to any provider may be rewritten.
    compatible_providers: Vec<String>,

    /// Which diagnostic messages to print.
    diagnostics: DiagnosticLevel,

    /// Whether to optimize subgraphs of control flow operators.
    recurse_into_subgraphs: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        OptimizeOptions {
            compatible_providers: Vec::new(),
            diagnostics: DiagnosticLevel::Off,
            recurse_into_subgraphs: true,
        }
    }
}

impl OptimizeOptions {
    /// Restrict rewrites to operators assigned to one of `providers`.
    pub fn with_compatible_providers<S: AsRef<str>>(mut self, providers: &[S]) -> Self {
        self.compatible_providers = providers.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn with_diagnostics(mut self, level: DiagnosticLevel) -> Self {
        self.diagnostics = level;
        self
    }

    pub fn with_recurse_into_subgraphs(mut self, recurse: bool) -> Self {
        self.recurse_into_subgraphs = recurse;
        self
    }

    pub fn compatible_providers(&self) -> &[String] {
        &self.compatible_providers
    }

    pub fn diagnostics(&self) -> DiagnosticLevel {
        self.diagnostics
    }

    pub fn recurse_into_subgraphs(&self) -> bool {
        self.recurse_into_subgraphs
    }

    /// Return true if operators assigned to `provider` may be rewritten.
    pub fn is_compatible_provider(&self, provider: &str) -> bool {
        self.compatible_providers.is_empty()
            || self.compatible_providers.iter().any(|p| p == provider)
    }
}

/// Applies rewrites planned by fusions to a [`Graph`].
///
/// After each rewrite, nodes that only fed the rewritten part of the graph
/// are removed.
struct GraphMutator<'a> {
    graph: &'a mut Graph,
}

impl<'a> GraphMutator<'a> {
    fn new(graph: &'a mut Graph) -> Self {
        GraphMutator { graph }
    }

    /// Replace an operator and its output with a constant, then remove
    /// ancestors of the operator which are no longer used.
    ///
    /// Panics if the operator cannot be replaced. Callers must check this
    /// first using [`Graph::can_replace_op_with_constant`].
    fn replace_op_with_constant(&mut self, op_id: NodeId, constant: Constant) -> NodeId {
        let input_ids: Vec<NodeId> = self
            .graph
            .get_node(op_id)
            .and_then(|n| n.as_operator())
            .map(|op| op.input_ids().iter().flatten().copied().collect())
            .unwrap_or_default();

        let const_id = match self.graph.replace_op_with_constant(op_id, constant) {
            Ok(const_id) => const_id,
            Err(err) => panic!("failed to replace operator with constant: {}", err),
        };
        self.remove_unused_nodes(input_ids);

        const_id
    }

    /// Remove values and constants in `value_ids` which have no consumers
    /// and are not graph inputs or outputs, together with the operators that
    /// produce them. Inputs of removed operators are then checked in turn.
    ///
    /// An operator is only removed if none of its outputs are used.
    fn remove_unused_nodes(&mut self, value_ids: Vec<NodeId>) {
        let mut pending = value_ids;

        while let Some(value_id) = pending.pop() {
            let graph = &*self.graph;
            if graph.consumer_count(value_id) > 0
                || graph.is_output(value_id)
                || graph.input_ids().contains(&value_id)
            {
                continue;
            }

            let removed = match graph.get_node(value_id) {
                Some(Node::Constant(_)) => vec![value_id],
                Some(Node::Value(_)) => {
                    let Some((op_id, op_node)) = graph.get_source_node(value_id) else {
                        continue;
                    };
                    let mut output_ids: Vec<NodeId> =
                        op_node.output_ids().iter().flatten().copied().collect();
                    let outputs_used = output_ids
                        .iter()
                        .any(|&id| graph.consumer_count(id) > 0 || graph.is_output(id));
                    if outputs_used {
                        continue;
                    }

                    pending.extend(op_node.input_ids().iter().flatten().copied());
                    output_ids.push(op_id);
                    output_ids
                }
                Some(Node::Operator(_)) | None => continue,
            };
            self.graph.remove_nodes(&removed);
        }
    }
}

/// Applies optimizations to a [`Graph`].
///
/// The only optimization currently performed replaces `Concat` nodes which
/// compute the target shape of a `Reshape` with constants, when the shape
/// can be determined ahead of time. See [`ReshapeFusion`].
pub struct GraphOptimizer {}

impl GraphOptimizer {
    pub fn new() -> Self {
        GraphOptimizer {}
    }

    /// Apply optimizations to a graph.
    ///
    /// The graph's input and output nodes, identified by
    /// [`input_ids`](Graph::input_ids) and [`output_ids`](Graph::output_ids)
    /// are preserved. Other nodes may be modified, removed or replaced.
    ///
    /// Returns true if the graph was modified.
    pub fn optimize(
        &self,
        graph: &mut Graph,
        options: &OptimizeOptions,
    ) -> Result<bool, OptimizeError> {
        let diag = Diagnostics::new(options.diagnostics);
        let order = graph.topo_order().map_err(|err| OptimizeError::Cycle {
            node: graph.node_name(err.node_id()),
        })?;

        let fusion = ReshapeFusion {};
        let mut modified = false;
        let mut fused_count = 0;

        for op_id in order {
            // Skip nodes removed by an earlier fusion.
            if graph.get_node(op_id).is_none() {
                continue;
            }

            if options.recurse_into_subgraphs {
                modified |= self.optimize_subgraphs(graph, op_id, options)?;
            }

            let Some(op_node) = graph.get_node(op_id).and_then(|n| n.as_operator()) else {
                continue;
            };
            let operator = op_node.operator();
            if !RESHAPE.matches(operator) || !options.is_compatible_provider(operator.provider())
            {
                continue;
            }
            let reshape_output = op_node.output_ids().first().copied().flatten();

            let Ok(plan) = fusion.maybe_fuse(graph, op_id, op_node) else {
                continue;
            };

            if let Err(err) = graph.can_replace_op_with_constant(plan.concat_id) {
                diag.warn(
                    graph,
                    plan.concat_id,
                    format_args!("cannot replace concat node with constant: {}", err),
                );
                continue;
            }

            GraphMutator::new(graph).replace_op_with_constant(plan.concat_id, plan.to_constant());
            fused_count += 1;
            modified = true;

            diag.info(
                graph,
                reshape_output.unwrap_or(op_id),
                format_args!("fused reshape node"),
            );
        }

        diag.info_summary(
            "ReshapeFusion",
            format_args!("total fused reshape node count: {}", fused_count),
        );

        Ok(modified)
    }

    /// Optimize the subgraphs owned by an operator.
    fn optimize_subgraphs(
        &self,
        graph: &mut Graph,
        op_id: NodeId,
        options: &OptimizeOptions,
    ) -> Result<bool, OptimizeError> {
        let node_name = graph.node_name(op_id);
        let Some(operator) = graph.get_operator_mut(op_id) else {
            return Ok(false);
        };

        let mut modified = false;
        for subgraph in operator.subgraphs_mut() {
            modified |= self
                .optimize(subgraph, options)
                .map_err(|error| OptimizeError::Subgraph {
                    node: node_name.clone(),
                    error: Box::new(error),
                })?;
        }
        Ok(modified)
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new()
    }
}
