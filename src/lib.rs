//! sqlmend: answers natural-language questions with SQL that is validated,
//! executed and, when it fails, repaired.
//!
//! This library exposes the core modules for use in integration tests.

pub mod app;
pub mod cli;
pub mod config;
pub mod correction;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod safety;
pub mod sandbox;
