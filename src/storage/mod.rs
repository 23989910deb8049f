//! Storage layer for the backup engine
//!
//! Provides JSON file storage with atomic writes, directory helpers and
//! tarball packing shared by the job registry, the pipelines and
//! import/export.

pub mod file_io;
pub mod tarball;

pub use file_io::{copy_tree, file_size, read_json, read_json_required, write_json_atomic};
pub use tarball::{create_tar_gz, extract_tar_gz};
