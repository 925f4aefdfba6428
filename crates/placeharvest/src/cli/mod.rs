//! CLI subcommand implementations for the placeharvest binary.

pub mod check_config;
pub mod doctor;
pub mod input;
pub mod run_cmd;
