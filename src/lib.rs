//! Sea-of-Nodes optimizing middle-end.
//!
//! Graph-rewriting passes over a per-method IR that mixes fixed control
//! nodes with floating data nodes, annotated with stamps and memory effects:
//! - Canonicalization and floating global value numbering
//! - Dominator-based conditional elimination and guard folding
//! - Memory- and loop-aware value numbering with loop-invariant reads
//! - A pipeline running them in order with cleanup canonicalization
#![deny(unsafe_op_in_unsafe_fn)]
pub mod error;
pub mod ir;
pub mod opt;

pub use error::{OptError, OptResult};
pub use ir::{Graph, GraphBuilder, NodeId, Operator, Stamp};
pub use opt::pipeline::{optimize, optimize_full, optimize_minimal};
pub use opt::{run_pass, OptimizationPass};
