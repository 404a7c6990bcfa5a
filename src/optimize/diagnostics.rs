use std::cell::RefCell;

use rustc_hash::FxHashSet;

use crate::graph::{Graph, NodeId};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiagnosticLevel {
    /// Don't show any diagnostics.
    #[default]
    Off,
    /// Report only unsuccessful optimizations.
    Warn,
    /// Report all optimizations.
    Info,
}

/// Diagnostic reporter for graph optimizations.
pub struct Diagnostics {
    /// Nodes against which diagnostics have been reported at the `Warn` level
    /// or higher.
    warned_nodes: RefCell<FxHashSet<NodeId>>,
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self {
            warned_nodes: RefCell::new(FxHashSet::default()),
            level,
        }
    }

    /// Return true if diagnostic messages are enabled at a given level.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        level != DiagnosticLevel::Off && self.level >= level
    }

    /// Log a diagnostic message for a given node at the [`Info`](DiagnosticLevel::Info) level.
    pub fn info(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Info) {
            return;
        }
        self.log(DiagnosticLevel::Info, &graph.node_name(node), message);
    }

    /// Log a message that is not associated with a node at the
    /// [`Info`](DiagnosticLevel::Info) level.
    pub fn info_summary(&self, scope: &str, message: std::fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Info) {
            return;
        }
        self.log(DiagnosticLevel::Info, scope, message);
    }

    /// Log a diagnostic message for a given node at the [`Warn`](DiagnosticLevel::Warn) level.
    ///
    /// Only the first warning for each node is reported.
    pub fn warn(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Warn) || !self.warned_nodes.borrow_mut().insert(node) {
            return;
        }
        self.log(DiagnosticLevel::Warn, &graph.node_name(node), message);
    }

    fn log(&self, level: DiagnosticLevel, name: &str, message: std::fmt::Arguments<'_>) {
        let level_char = match level {
            DiagnosticLevel::Warn => 'W',
            DiagnosticLevel::Info => 'I',
            DiagnosticLevel::Off => unreachable!(),
        };
        println!("{}| {}: {}", level_char, name, message);
    }
}

#[cfg(test)]
mod tests {
    use super::{DiagnosticLevel, Diagnostics};
    use crate::graph::Graph;

    #[test]
    fn test_enabled() {
        let diag = Diagnostics::new(DiagnosticLevel::Warn);
        assert!(diag.enabled(DiagnosticLevel::Warn));
        assert!(!diag.enabled(DiagnosticLevel::Info));
        assert!(!diag.enabled(DiagnosticLevel::Off));

        let diag = Diagnostics::new(DiagnosticLevel::Off);
        assert!(!diag.enabled(DiagnosticLevel::Warn));
    }

    #[test]
    fn test_warn_once_per_node() {
        let mut graph = Graph::new();
        let x = graph.add_value(Some("x"), None, None);
        let diag = Diagnostics::new(DiagnosticLevel::Warn);

        diag.warn(&graph, x, format_args!("first"));
        diag.warn(&graph, x, format_args!("second"));

        assert_eq!(diag.warned_nodes.borrow().len(), 1);
    }
}
