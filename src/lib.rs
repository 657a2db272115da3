//! pacsflow - runs clinical imaging sagas against the local filesystem
//!
//! The workspace crates hold the engine; this crate wires it to a local
//! file library and a directory scanner for the command line.

pub mod local;
pub mod scan;

pub use local::{check_label, LocalLibrary};
pub use scan::{collect_files, ScanError};
