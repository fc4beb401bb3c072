//! Session management for the fact engine.

pub mod manager;

pub use manager::{FactSession, PollResult};
