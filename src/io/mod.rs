//! I/O module
//!
//! Handles replay CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, output serialization)
//! - `reader` - Streaming operation reader with iterator interface

pub mod csv_format;
pub mod reader;

pub use csv_format::{
    convert_operation_record, write_outcomes_csv, Operation, OperationRecord, OutcomeRecord,
    STATUS_INVALID, STATUS_OK,
};
pub use reader::{OperationReader, ParsedRow};
