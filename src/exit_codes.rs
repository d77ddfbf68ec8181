//! Process exit codes for the `gp-bench` binary.
//! Recorded per-configuration failures still exit with `SUCCESS`.

use gp_bench::{Error, ErrorCategory};

pub const SUCCESS: i32 = 0;
pub const OTHER_ERROR: i32 = 1;
pub const CONFIG_ERROR: i32 = 2;
pub const SETUP_ERROR: i32 = 3;
pub const STORAGE_ERROR: i32 = 4;
pub const INTERRUPTED: i32 = 130; // 128 + SIGINT

/// Exit code for a library error.
pub const fn for_error(error: &Error) -> i32 {
    match error.category() {
        ErrorCategory::Setup => SETUP_ERROR,
        ErrorCategory::Storage => STORAGE_ERROR,
        ErrorCategory::Config => CONFIG_ERROR,
        ErrorCategory::Other => OTHER_ERROR,
    }
}

/// Exit code for a top-level `anyhow` error, looking through its context.
pub fn for_report(report: &anyhow::Error) -> i32 {
    report
        .chain()
        .find_map(|cause| cause.downcast_ref::<Error>())
        .map_or(OTHER_ERROR, for_error)
}
