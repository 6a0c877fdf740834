mod infer;

pub use infer::{infer_schema, value_data_type};
