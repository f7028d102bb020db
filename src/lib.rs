//! Runs a routing engine whose routes are compiled from pipeline scripts in
//! a directory, with an operator console to stop or reload it.

pub mod config;
pub mod core;
pub mod engine;
pub mod logging;
pub mod orchestration;
pub mod pipeline;
