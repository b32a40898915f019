//! Flat export sinks

mod csv_file;

pub use csv_file::CsvExport;
