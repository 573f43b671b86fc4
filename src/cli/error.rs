// Exit codes for CLI automation
pub const SUCCESS: i32 = 0;
pub const ERROR: i32 = 1;
pub const INVALID_INPUT: i32 = 3;

/// Wrong usage that should exit with `INVALID_INPUT` rather than `ERROR`
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidInput(pub String);
