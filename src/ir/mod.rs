//! Sea-of-Nodes intermediate representation.
//!
//! # Core Components
//!
//! - **Stamps** (`stamp.rs`): abstract value lattice
//! - **Operators** (`operators.rs`): node kinds and their capabilities
//! - **Arena** (`arena.rs`): typed ids, side tables, bit sets
//! - **Node** (`node.rs`): IR node definitions
//! - **Graph** (`graph.rs`): node storage, usages, control links, events
//! - **Graph utilities** (`graph_util.rs`): deletion cascades and CFG surgery
//! - **CFG** (`cfg.rs`): blocks, dominators, loops
//! - **Builder** (`builder.rs`): structured graph construction
//! - **Optimization log** (`opt_log.rs`): record of applied rewrites

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod graph;
pub mod graph_util;
pub mod node;
pub mod operators;
pub mod opt_log;
pub mod stamp;

// Re-export commonly used types
pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::GraphBuilder;
pub use cfg::{BasicBlock, BlockId, Cfg, ControlFlowView, DominatorTree, Loop, LoopAnalysis};
pub use graph::{Graph, GraphEvent, GraphState};
pub use node::{InputList, Node, NodeFlags, NodeId};
pub use operators::{
    ArithOp, BitwiseOp, CallTarget, CmpOp, ControlOp, ControlShape, DeoptAction, DeoptInfo,
    DeoptReason, GuardInfo, InputType, Intrinsic, LocationIdentity, Operator, Probability,
    Speculation,
};
pub use opt_log::{LogEntry, OptimizationLog, RewriteKind};
pub use stamp::{ConstantValue, IntegerStamp, LogicStamp, ObjectStamp, Stamp, TriState};
