//! Centralized environment variable names and default values for engine tuning.

// Environment variable names
pub const ENV_MAPPERS: &str = "TAPEREDUCE_MAPPERS";
pub const ENV_REDUCERS: &str = "TAPEREDUCE_REDUCERS";
pub const ENV_WORKDIR: &str = "TAPEREDUCE_WORKDIR";
pub const ENV_KEEP_INTERMEDIATES: &str = "TAPEREDUCE_KEEP_INTERMEDIATES";

/// Parent directory for per-run workspaces when `TAPEREDUCE_WORKDIR` is not set
pub const DEFAULT_WORKDIR: &str = ".tapereduce_runs";

// Workspace layout
pub const MAP_OUT_DIR: &str = "map_out";
pub const SHUFFLE_OUT_DIR: &str = "shuffle_out";
pub const RUN_REPORT_FILE: &str = "run_report.json";

// Scratch suffixes appended to a mapper file name: two merge tapes and the aggregate target
pub const TAPE_B_SUFFIX: &str = "b";
pub const TAPE_C_SUFFIX: &str = "c";
pub const AGGREGATE_SUFFIX: &str = "d";
