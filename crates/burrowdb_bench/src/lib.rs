//! Shared fixtures for the burrowdb benchmarks.

pub mod utils;
