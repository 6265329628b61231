/// Format name constants to ensure consistency across the codebase
pub const JSON_FORMAT: &str = "json";
pub const CSV_FORMAT: &str = "csv";
pub const SQLITE_FORMAT: &str = "sqlite";

// Directory keys understood by the configuration's [paths] table
pub const RAW_DATA_DIR: &str = "raw_data_dir";
pub const STAGING_DATA_DIR: &str = "staging_data_dir";
pub const OUTPUT_DATA_DIR: &str = "output_data_dir";
pub const LOGS_DIR: &str = "logs_dir";

// Token prefixes recognized by the built-in stages
pub const TEAM_KEY: &str = "TEAM";
pub const PLAYER_KEY: &str = "PLAYER";
pub const EVENT_KEY: &str = "EVENT";

// Token separator within a log line
pub const TOKEN_SEPARATOR: char = '|';

// Metadata keys written by the pipeline itself
pub const META_TRANSFORM_COUNT: &str = "transform_count";
pub const META_WARNINGS: &str = "warnings";
pub const META_SHORT_CIRCUITED_BY: &str = "short_circuited_by";
pub const META_SOURCE: &str = "source";

pub const PROVENANCE_FILE: &str = "provenance.jsonl";
