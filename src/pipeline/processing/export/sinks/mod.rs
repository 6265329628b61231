// Built-in export sinks
pub mod csv;
pub mod json;
pub mod sqlite;

pub use self::csv::CsvSink;
pub use self::json::JsonSink;
pub use self::sqlite::SqliteSink;
