//! In-memory filesystem for tests and sandboxed evaluation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::value::{ByteCount, Date, FileInfo, FileMode, Path};

use super::{FsError, Filesystem};

#[derive(Debug, Default)]
pub struct MemFilesystem {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, Vec<u8>)>) -> Self {
        Self {
            files: Mutex::new(
                files
                    .into_iter()
                    .map(|(path, content)| (path.into(), content))
                    .collect(),
            ),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

impl Filesystem for MemFilesystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.files
            .lock()
            .unwrap()
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), FsError> {
        if path.is_dir_path() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.as_str().to_string(), content.to_vec());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        self.files
            .lock()
            .unwrap()
            .remove(path.as_str())
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path.as_str())
    }

    fn metadata(&self, path: &Path) -> Result<FileInfo, FsError> {
        let files = self.files.lock().unwrap();
        let content = files
            .get(path.as_str())
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let name = path
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(FileInfo {
            name,
            abs_path: path.clone(),
            size: ByteCount::new(content.len() as i64),
            mode: FileMode(0o644),
            mod_time: Date::now(),
            is_dir: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove_round_trip() {
        let fs = MemFilesystem::new();
        let path = Path::new("/a.txt").unwrap();
        fs.write_file(&path, b"hello").unwrap();
        assert!(fs.exists(&path));
        assert_eq!(fs.read_file(&path).unwrap(), b"hello");
        assert_eq!(fs.metadata(&path).unwrap().size, ByteCount::new(5));
        fs.remove_file(&path).unwrap();
        assert!(matches!(fs.read_file(&path), Err(FsError::NotFound(_))));
    }
}
