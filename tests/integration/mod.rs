//! Integration tests for sqlmend.

pub mod correction_test;
pub mod memory_test;
pub mod postgres_test;
pub mod sandbox_test;
pub mod validator_test;
