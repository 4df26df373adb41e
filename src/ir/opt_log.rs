//! Append-only optimization log.
//!
//! Every structural rewrite reports here. The optimizer never reads the log
//! back; it exists for external tooling and for tests.

use super::node::NodeId;

/// What kind of rewrite happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewriteKind {
    Canonicalization,
    StampFolding,
    ControlFlowSimplification,
    ValueNumbering,
    DeadCodeElimination,
    DeadPhiCycle,
    IfElimination,
    GuardElimination,
    FixedGuardElimination,
    GuardFolding,
    PhiImprovement,
    SwitchValueProven,
    MemoryValueNumbering,
    LoopInvariantMotion,
}

/// One rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub pass: &'static str,
    pub kind: RewriteKind,
    pub node: NodeId,
    pub replacement: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct OptimizationLog {
    entries: Vec<LogEntry>,
    enabled: bool,
}

impl OptimizationLog {
    pub fn new() -> Self {
        OptimizationLog {
            entries: Vec::new(),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn report(
        &mut self,
        pass: &'static str,
        kind: RewriteKind,
        node: NodeId,
        replacement: Option<NodeId>,
    ) {
        log::trace!("[{}] {:?} {:?} -> {:?}", pass, kind, node, replacement);
        if self.enabled {
            self.entries.push(LogEntry {
                pass,
                kind,
                node,
                replacement,
            });
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries of one kind.
    pub fn count(&self, kind: RewriteKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OptimizationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_counts_by_kind() {
        let mut log = OptimizationLog::new();
        log.report("canonicalizer", RewriteKind::Canonicalization, NodeId::new(1), None);
        log.report(
            "canonicalizer",
            RewriteKind::ValueNumbering,
            NodeId::new(2),
            Some(NodeId::new(1)),
        );
        assert_eq!(log.len(), 2);
        assert_eq!(log.count(RewriteKind::ValueNumbering), 1);
        assert_eq!(log.entries()[1].replacement, Some(NodeId::new(1)));
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let mut log = OptimizationLog::new();
        log.set_enabled(false);
        log.report("x", RewriteKind::GuardFolding, NodeId::new(0), None);
        assert!(log.is_empty());
    }
}
