// Library interface for newsbrief modules
// This allows the binary and integration tests to import modules

pub mod delivery;
pub mod error;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod search;
