//! The filesystem handle owned by execution contexts.
//!
//! Builtins never touch the OS directly: they go through the context's
//! [`Filesystem`], so tests and sandboxed runs can substitute the in-memory
//! implementation.

mod mem;
mod os;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::value::{FileInfo, Path};

pub use mem::MemFilesystem;
pub use os::OsFilesystem;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("a file already exists at {0}")]
    AlreadyExists(String),
    #[error("{0} is a directory")]
    IsDirectory(String),
    #[error("i/o error at {path}: {message}")]
    Io { path: String, message: String },
}

pub trait Filesystem: Send + Sync + fmt::Debug {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError>;
    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), FsError>;
    fn remove_file(&self, path: &Path) -> Result<(), FsError>;
    fn exists(&self, path: &Path) -> bool;
    fn metadata(&self, path: &Path) -> Result<FileInfo, FsError>;
}

pub type SharedFilesystem = Arc<dyn Filesystem>;
