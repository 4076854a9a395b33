//! Concurrent directory walker.
//!
//! This module provides:
//! - The work queue and its units (directories, split directory remainders,
//!   commands)
//! - The worker loop that scans directories and filters entries
//! - The termination barrier that detects when all workers ran out of work
//! - The [`Walker`] driver that spawns, polls and joins the workers

mod barrier;
mod coordinator;
mod queue;
mod worker;

pub use barrier::{BarrierWait, TerminationBarrier};
pub use coordinator::{WalkOptions, WalkOutcome, Walker};
pub use queue::{Directory, WorkQueue, WorkSubmitter, WorkUnit};
pub use worker::WalkStats;
