//! Debug-session orchestrator for remote GPU competition runs.
//!
//! Tracks work units keyed by (competition, data-row, debug-step) across
//! three systems that all fail independently: a locally spawned submission
//! process, a remote GPU job service reachable only over HTTP, and an AI
//! reviewer whose output is untrusted text. No single source of truth
//! exists, so state is reconciled on demand:
//!
//! - **[`registry`]**: in-memory hint of live local processes.
//! - **[`store`]**: file artifacts (code, raw logs, result and analysis
//!   records) that survive restarts and serve as fallback truth.
//! - **[`status`]**: derives a session's state from the two on every call.
//! - **[`launch`]** / **[`cancel`]**: the only writers of registry entries.
//! - **[`remote`]**: job-service client; job ids are scraped from raw logs.
//! - **[`analysis`]**: prompt assembly, backend round-trip, salvage parsing.

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod error;
pub mod launch;
pub mod logging;
pub mod registry;
pub mod remote;
pub mod scaffold;
pub mod session;
pub mod status;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
