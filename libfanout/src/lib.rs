#![forbid(unsafe_code)]

//! # fanout
//!
//! The shared code for fanout. Encapsulates abstractions for things like:
//!
//! - Loading target and command lists
//! - Fanning a command list out across a fleet of SSH hosts and collecting
//!   every (host, command) outcome
//! - Rendering the collected outcomes as a deterministic report
//! - Logging and tracing

pub mod executor;
pub mod log;
pub mod plan;
pub mod report;
