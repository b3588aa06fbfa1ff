//! Per-device exploration sessions

mod controller;
mod state;

#[cfg(test)]
mod tests;

pub use controller::{has_runtime_error, numeric_input, random_input, SessionController};
pub use state::{SessionState, VisitOutcome};
