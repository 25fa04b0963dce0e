//! OS-backed filesystem.

use std::fs;
use std::io;

use chrono::{DateTime, Utc};

use crate::value::{ByteCount, Date, FileInfo, FileMode, Path};

use super::{FsError, Filesystem};

/// Direct pass-through to the host filesystem. Only absolute paths are
/// accepted; permission checks happen before calls reach this layer.
#[derive(Debug, Default)]
pub struct OsFilesystem;

impl OsFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn map_io_error(path: &Path, err: io::Error) -> FsError {
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        _ => FsError::Io {
            path: path.to_string(),
            message: err.to_string(),
        },
    }
}

impl Filesystem for OsFilesystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        fs::read(path.as_str()).map_err(|e| map_io_error(path, e))
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), FsError> {
        fs::write(path.as_str(), content).map_err(|e| map_io_error(path, e))
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        fs::remove_file(path.as_str()).map_err(|e| map_io_error(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        std::path::Path::new(path.as_str()).exists()
    }

    fn metadata(&self, path: &Path) -> Result<FileInfo, FsError> {
        let meta = fs::metadata(path.as_str()).map_err(|e| map_io_error(path, e))?;
        let mod_time = meta
            .modified()
            .map(|t| Date::new(DateTime::<Utc>::from(t)))
            .unwrap_or_else(|_| Date::now());
        let name = path
            .as_str()
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or_default()
            .to_string();
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            FileMode(meta.permissions().mode())
        };
        #[cfg(not(unix))]
        let mode = FileMode(0);
        Ok(FileInfo {
            name,
            abs_path: path.clone(),
            size: ByteCount::new(meta.len() as i64),
            mode,
            mod_time,
            is_dir: meta.is_dir(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_writes_through_the_os() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f.txt");
        let path = Path::new(file_path.to_string_lossy().to_string()).unwrap();

        let fs = OsFilesystem::new();
        fs.write_file(&path, b"content").unwrap();
        assert_eq!(fs.read_file(&path).unwrap(), b"content");

        let info = fs.metadata(&path).unwrap();
        assert_eq!(info.size, ByteCount::new(7));
        assert_eq!(info.name, "f.txt");
        assert!(!info.is_dir);

        fs.remove_file(&path).unwrap();
        assert!(!fs.exists(&path));
    }
}
