//! Core library components.
//!
//! Everything the `secure-run` binary does lives here; the CLI layer only
//! parses flags and renders [`orchestrator::Event`]s.

pub mod cipher;
pub mod config;
pub mod constants;
pub mod detect;
pub mod env;
pub mod envblock;
pub mod orchestrator;
pub mod plan;
pub mod platform;
pub mod resolver;
pub mod retry;
pub mod scanner;
pub mod snapshot;
pub mod store;
pub mod upload;
pub mod validation;
pub mod vault;
