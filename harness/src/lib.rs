//! Orchestration layer for evaluator/performer agent benchmarks.
//!
//! An evaluator assigns a task to a remotely hosted performer, the performer
//! drives a simulator through a plan/act loop and returns a recorded video, and
//! the evaluator scores that video. The crate keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (message codec, protocol messages,
//!   plan state, score extraction, generation parsing). No I/O.
//! - **[`io`]**: Side-effecting boundaries (config, completion service, agent
//!   transport, simulator, frame extraction, task files). Every remote
//!   collaborator sits behind a trait so tests can script it.
//!
//! Orchestration modules ([`resolver`], [`registry`], [`policy`],
//! [`orchestrator`], [`performer`], [`evaluator`]) combine the two.

pub mod core;
pub mod error;
pub mod evaluator;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod performer;
pub mod policy;
pub mod readiness;
pub mod registry;
pub mod resolver;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
