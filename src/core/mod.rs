//! Core orchestration
//!
//! Runs the discovery, profile, tuning and bookkeeping phases in order.

mod orchestrator;

pub use orchestrator::{Discovery, Orchestrator, ProfileOutcome, RunOutcome, SkippedPhase};
