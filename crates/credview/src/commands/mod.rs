//! Command dispatch: bridges CLI args -> core view -> output formatting.

pub mod config_cmd;
pub mod replay;
