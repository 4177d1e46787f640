//! Per-namespace request handlers.

pub mod gateway;
pub mod tools;
