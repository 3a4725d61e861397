//! Scoped file access handed to resource read/write callbacks.
//!
//! Paths are slash-separated and relative to the root of the view (one
//! commit's tree for repository-backed filesystems). Leading `/` and `./`
//! components are ignored; `..` is rejected.

use std::io;

/// Metadata about a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Final path component.
    pub name: String,
    /// Size in bytes (zero for directories).
    pub size: u64,
    pub is_dir: bool,
}

/// File I/O rooted at a single tree.
///
/// Methods take `&self`; implementations that support writes use interior
/// mutability and report `PermissionDenied` when opened read-only.
pub trait Filesystem {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()>;

    fn stat(&self, path: &str) -> io::Result<FileInfo>;

    /// Remove a file, or a directory together with everything below it.
    fn remove(&self, path: &str) -> io::Result<()>;

    /// Entries of a directory sorted by name.
    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>>;

    /// Directories are implicit in version-control trees, so most
    /// implementations only need to validate the path.
    fn create_dir_all(&self, path: &str) -> io::Result<()>;

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Filesystem whose paths are all resolved beneath `dir`.
pub struct SubFilesystem<'a> {
    inner: &'a dyn Filesystem,
    dir: String,
}

impl<'a> SubFilesystem<'a> {
    pub fn new(inner: &'a dyn Filesystem, dir: impl Into<String>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    fn join(&self, path: &str) -> io::Result<String> {
        let dir = clean_path(&self.dir)?;
        let path = clean_path(path)?;
        Ok(match (dir.is_empty(), path.is_empty()) {
            (true, _) => path,
            (false, true) => dir,
            (false, false) => format!("{dir}/{path}"),
        })
    }
}

impl Filesystem for SubFilesystem<'_> {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.inner.read(&self.join(path)?)
    }

    fn write(&self, path: &str, contents: &[u8]) -> io::Result<()> {
        self.inner.write(&self.join(path)?, contents)
    }

    fn stat(&self, path: &str) -> io::Result<FileInfo> {
        self.inner.stat(&self.join(path)?)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.inner.remove(&self.join(path)?)
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<FileInfo>> {
        self.inner.read_dir(&self.join(path)?)
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        self.inner.create_dir_all(&self.join(path)?)
    }
}

/// Normalise a relative path: drop empty, `.` and leading `/` components.
/// The empty string denotes the root.
pub fn clean_path(path: &str) -> io::Result<String> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path escapes filesystem root: {path}"),
                ));
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}
