//! Reconciliation engine and run orchestration for triagesync.
//!
//! This crate ties tracker fetching, hierarchy resolution, plan computation,
//! and backend execution into end-to-end runs (e.g., [`sync::run_sync`]).

pub mod execute;
pub mod reconcile;
pub mod sync;

pub use execute::{ActionKind, DescendantSource, ExecutionReport, FailureEntry, execute};
pub use reconcile::{ReconcileMode, ReconcilePlan, plan};
pub use sync::{PlanCounts, ProgressReporter, SilentProgress, SyncOptions, SyncOutcome, run_sync};
