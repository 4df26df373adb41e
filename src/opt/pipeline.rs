//! Optimization Pipeline.
//!
//! Runs the passes in a fixed order, re-canonicalizing after every pass that
//! left the graph non-canonical:
//!
//! 1. **Canonicalization**: local rewriting, stamp folding, floating GVN
//! 2. **Conditional**: dominator-based conditional elimination
//! 3. **Memory**: memory-aware value numbering and loop-invariant reads
//!
//! Every pass goes through `run_pass`, so each one sees the graph state it
//! requires and records the state it establishes. The whole sequence may be
//! repeated for up to `max_rounds` rounds while it keeps changing the graph.

use super::canonicalize::Canonicalizer;
use super::conditional::ConditionalElimination;
use super::dominator_gvn::{DominatorGvn, DominatorGvnConfig};
use super::{run_pass, OptimizationPass};
use crate::error::OptResult;
use crate::ir::graph::{Graph, GraphState};

use std::time::{Duration, Instant};

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    /// Canonicalization of the incoming graph.
    Canonicalization,
    /// Flow-sensitive elimination of conditions and guards.
    Conditional,
    /// Memory-aware value numbering.
    Memory,
}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    pass: Box<dyn OptimizationPass>,
    phase: PassPhase,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: OptimizationPass + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Configuration for the optimization pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Times the whole pass sequence may run.
    pub max_rounds: usize,

    /// Enable conditional elimination.
    pub enable_conditional_elimination: bool,

    /// Enable memory-aware value numbering.
    pub enable_dominator_gvn: bool,

    /// Hoist loop-invariant reads during memory-aware value numbering.
    pub enable_licm: bool,

    /// Verify the graph after every pass.
    pub verify: bool,

    /// Collect timing statistics.
    pub collect_timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 1,
            enable_conditional_elimination: true,
            enable_dominator_gvn: true,
            enable_licm: true,
            verify: false,
            collect_timing: true,
        }
    }
}

impl PipelineConfig {
    /// Canonicalization only.
    pub fn minimal() -> Self {
        Self {
            max_rounds: 1,
            enable_conditional_elimination: false,
            enable_dominator_gvn: false,
            enable_licm: false,
            verify: false,
            collect_timing: false,
        }
    }

    /// Every pass, repeated until nothing changes, with verification.
    pub fn full() -> Self {
        Self {
            max_rounds: 4,
            verify: true,
            ..Default::default()
        }
    }
}

// =============================================================================
// Optimization Pipeline
// =============================================================================

/// The main optimization pipeline.
pub struct OptPipeline {
    config: PipelineConfig,

    /// The canonicalizer used for the first pass and for cleanups.
    canonicalizer: PassEntry,

    /// Registered passes in order.
    passes: Vec<PassEntry>,

    total_rounds: usize,

    total_time: Duration,
}

impl OptPipeline {
    /// Create a new pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        let mut pipeline = Self {
            config,
            canonicalizer: PassEntry::new(Canonicalizer::new(), PassPhase::Canonicalization),
            passes: Vec::new(),
            total_rounds: 0,
            total_time: Duration::ZERO,
        };

        pipeline.register_default_passes();
        pipeline
    }

    fn register_default_passes(&mut self) {
        if self.config.enable_conditional_elimination {
            self.register(ConditionalElimination::new(), PassPhase::Conditional);
        }
        if self.config.enable_dominator_gvn {
            let gvn = DominatorGvnConfig {
                enable_licm: self.config.enable_licm,
                ..DominatorGvnConfig::default()
            };
            self.register(DominatorGvn::with_config(gvn), PassPhase::Memory);
        }
    }

    /// Register a custom pass; it runs after the registered ones.
    pub fn register<P: OptimizationPass + 'static>(&mut self, pass: P, phase: PassPhase) {
        self.passes.push(PassEntry::new(pass, phase));
    }

    /// Run the optimization pipeline on a graph.
    pub fn run(&mut self, graph: &mut Graph) -> OptResult<PipelineStats> {
        let start = Instant::now();
        let initial_size = graph.iter().count();
        let mut stats = PipelineStats::default();

        let mut rounds = 0;
        while rounds < self.config.max_rounds.max(1) {
            rounds += 1;
            let mut changed = self.run_entry(graph, None, &mut stats)?;
            for index in 0..self.passes.len() {
                if self.run_entry(graph, Some(index), &mut stats)? {
                    changed = true;
                }
                if !graph.has_state(GraphState::CANONICAL) {
                    self.run_entry(graph, None, &mut stats)?;
                }
            }
            log::debug!("pipeline round {}: changed = {}", rounds, changed);
            if !changed {
                break;
            }
        }

        self.total_rounds = rounds;
        self.total_time = start.elapsed();

        stats.rounds = rounds;
        stats.total_time = self.total_time;
        stats.initial_size = initial_size;
        stats.final_size = graph.iter().count();
        Ok(stats)
    }

    /// Run the canonicalizer (`None`) or a registered pass.
    fn run_entry(
        &mut self,
        graph: &mut Graph,
        index: Option<usize>,
        stats: &mut PipelineStats,
    ) -> OptResult<bool> {
        let entry = match index {
            Some(index) => &mut self.passes[index],
            None => &mut self.canonicalizer,
        };
        let start = self.config.collect_timing.then(Instant::now);

        let changed = run_pass(entry.pass.as_mut(), graph)?;

        if let Some(start) = start {
            entry.time += start.elapsed();
        }
        entry.runs += 1;
        stats.passes_run += 1;
        if changed {
            entry.changes += 1;
            stats.changes += 1;
        }
        if self.config.verify {
            graph.verify()?;
        }
        Ok(changed)
    }

    /// Get pass statistics, canonicalizer first.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        std::iter::once(&self.canonicalizer)
            .chain(&self.passes)
            .map(|e| PassStat {
                name: e.pass.name().to_string(),
                phase: e.phase,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }

    #[inline]
    pub fn rounds(&self) -> usize {
        self.total_rounds
    }

    #[inline]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for OptPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics from a single pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    pub name: String,
    pub phase: PassPhase,
    /// Number of times run.
    pub runs: usize,
    /// Number of runs that changed the graph.
    pub changes: usize,
    /// Total time spent in this pass.
    pub time: Duration,
}

/// Statistics from the entire pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Rounds of the pass sequence.
    pub rounds: usize,
    /// Pass runs, cleanups included.
    pub passes_run: usize,
    /// Pass runs that changed the graph.
    pub changes: usize,
    pub total_time: Duration,
    /// Live nodes before.
    pub initial_size: usize,
    /// Live nodes after.
    pub final_size: usize,
}

impl PipelineStats {
    /// Final size over initial size.
    pub fn size_reduction(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Optimize Functions
// =============================================================================

/// Run the full pipeline on a graph.
pub fn optimize_full(graph: &mut Graph) -> OptResult<PipelineStats> {
    OptPipeline::with_config(PipelineConfig::full()).run(graph)
}

/// Run the canonicalizer only.
pub fn optimize_minimal(graph: &mut Graph) -> OptResult<PipelineStats> {
    OptPipeline::with_config(PipelineConfig::minimal()).run(graph)
}

/// Run the default pipeline on a graph.
pub fn optimize(graph: &mut Graph) -> OptResult<PipelineStats> {
    OptPipeline::new().run(graph)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::GraphBuilder;
    use crate::ir::operators::LocationIdentity;
    use crate::ir::stamp::Stamp;

    #[test]
    fn test_pass_phase_ordering() {
        assert!(PassPhase::Canonicalization < PassPhase::Conditional);
        assert!(PassPhase::Conditional < PassPhase::Memory);
    }

    #[test]
    fn test_pipeline_config_presets() {
        let config = PipelineConfig::default();
        assert!(config.enable_conditional_elimination);
        assert!(config.enable_dominator_gvn);
        assert!(!config.verify);

        let minimal = PipelineConfig::minimal();
        assert!(!minimal.enable_conditional_elimination);
        assert!(!minimal.enable_dominator_gvn);

        assert!(PipelineConfig::full().verify);
    }

    #[test]
    fn test_pipeline_run_empty() {
        let mut graph = GraphBuilder::new().finish();
        let mut pipeline = OptPipeline::new();
        let stats = pipeline.run(&mut graph).unwrap();
        assert_eq!(stats.rounds, 1);
        assert_eq!(stats.changes, 0);
        assert!(graph.has_state(
            GraphState::CANONICAL
                | GraphState::CONDITIONS_ELIMINATED
                | GraphState::MEMORY_VALUE_NUMBERED
        ));
    }

    #[test]
    fn test_pipeline_cleans_up_after_gvn() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let first = b.load(obj, LocationIdentity::Field(0));
        let second = b.load(obj, LocationIdentity::Field(0));
        let diff = b.sub(first, second);
        let ret = b.return_value(Some(diff));
        let mut graph = b.finish();

        let stats = optimize_full(&mut graph).unwrap();
        assert!(stats.changes >= 2);
        assert!(stats.final_size < stats.initial_size);
        let zero = graph.node(ret).input(0).unwrap();
        assert_eq!(graph.node(zero).as_int(), Some(0));
        assert!(!graph.is_alive(second));
    }

    #[test]
    fn test_minimal_skips_memory_pass() {
        let mut b = GraphBuilder::new();
        let obj = b.parameter(0, Stamp::object_non_null());
        let first = b.load(obj, LocationIdentity::Field(0));
        let second = b.load(obj, LocationIdentity::Field(0));
        let sum = b.add(first, second);
        b.return_value(Some(sum));
        let mut graph = b.finish();

        optimize_minimal(&mut graph).unwrap();
        assert!(graph.is_alive(second));
        assert!(!graph.has_state(GraphState::MEMORY_VALUE_NUMBERED));
    }

    #[test]
    fn test_pass_stats() {
        let mut graph = GraphBuilder::new().finish();
        let mut pipeline = OptPipeline::new();
        pipeline.run(&mut graph).unwrap();

        let stats = pipeline.pass_stats();
        let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["canonicalizer", "conditional_elimination", "dominator_gvn"]);
        assert_eq!(stats[0].runs, 1);
        assert_eq!(pipeline.rounds(), 1);
    }

    #[test]
    fn test_pipeline_stats_size_reduction() {
        let stats = PipelineStats {
            initial_size: 100,
            final_size: 80,
            ..Default::default()
        };
        assert_eq!(stats.size_reduction(), 0.8);
        assert_eq!(PipelineStats::default().size_reduction(), 1.0);
    }
}
