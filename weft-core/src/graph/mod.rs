//! The reactive dependency graph.
//!
//! This module tracks which state reads happened during each derived
//! computation and turns commits into deferred re-evaluation work.
//!
//! # Overview
//!
//! - Nodes are derived computations with stable identities
//! - Edges are dependency keys: a state cell, or another node's output
//! - A commit invalidates the subscribers of every changed cell and
//!   pushes them onto a deferred queue
//! - A scheduling pass drains the queue later, re-evaluating stale nodes
//!   under a hard per-pass evaluation budget
//!
//! # Design decisions
//!
//! 1. Dependency sets are rebuilt from scratch on every evaluation.
//!    Edges are exactly what the latest run read — nothing accumulates.
//!
//! 2. Propagation is push-invalidate, pull-evaluate: commits only mark
//!    and enqueue; values recompute when the scheduler or a reader asks.
//!
//! 3. Cycle protection is a bounded work queue with an explicit failure,
//!    not recursion. A cycle costs one abandoned pass, never a hang.

mod derived;
mod node;
mod registry;
mod scheduler;
mod scope;

pub use derived::Derived;
pub use node::{DepKey, NodeId, NodeState};
pub use scheduler::PassSummary;
pub use scope::EvalScope;

pub(crate) use registry::Graph;
pub(crate) use scheduler::run_pass;
