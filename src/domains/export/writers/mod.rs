pub mod csv_writer;
pub mod json_writer;
pub mod parquet_writer;

pub use csv_writer::StreamingCsvWriter;
pub use json_writer::JsonLinesWriter;
pub use parquet_writer::StreamingParquetWriter;
