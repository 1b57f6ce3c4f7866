//! Stable exit codes for the launcher and agent binaries.

/// Command succeeded (every batch item included).
pub const OK: i32 = 0;
/// Command failed due to invalid config, arguments, or an aborted run.
pub const INVALID: i32 = 1;
/// A batch ran to the end but at least one task failed.
pub const PARTIAL: i32 = 2;
