//! CTR Studio: LLM-driven click-through rate simulation.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod sampler;
pub mod llm;
pub mod engine;
pub mod api;
