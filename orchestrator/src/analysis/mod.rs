//! AI-backed post-run analysis: prompt assembly, backend round-trip,
//! salvage parsing, and persistence.

pub mod backend;
pub mod extract;
pub mod pipeline;
pub mod prompt;
pub mod record;
pub mod syntax;
