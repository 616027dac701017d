//! Scoped file access
//!
//! [`DocumentStore`](crate::DocumentStore) never touches the file system
//! directly. It acquires a [`FileGuard`] for the document path, reads and
//! writes through it, and drops it when the operation ends.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use uuid::Uuid;

/// Access to the document behind one path for the duration of an operation
pub trait FileGuard {
    fn path(&self) -> &Path;

    /// Current bytes, or `None` if the file does not exist
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace the file contents. Readers see the old or the new bytes, never a mix.
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        write_atomic(self.path(), bytes)
    }
}

/// Hands out guards. Release happens when the guard is dropped.
pub trait FileAccess: Send + Sync {
    fn acquire<'a>(&'a self, path: &Path) -> io::Result<Box<dyn FileGuard + 'a>>;
}

/// Unsynchronized access; concurrent writers to one path race
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAccess;

struct DirectGuard {
    path: PathBuf,
}

impl FileGuard for DirectGuard {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl FileAccess for DirectAccess {
    fn acquire<'a>(&'a self, path: &Path) -> io::Result<Box<dyn FileGuard + 'a>> {
        Ok(Box::new(DirectGuard {
            path: path.to_path_buf(),
        }))
    }
}

/// Exclusive access per path within this process. Callers block until the
/// current holder's guard is dropped.
#[derive(Debug, Default)]
pub struct SerializedAccess {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl SerializedAccess {
    pub fn new() -> Self {
        Self::default()
    }

    fn release(&self, path: &Path) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(path);
        self.released.notify_all();
    }
}

struct SerializedGuard<'a> {
    owner: &'a SerializedAccess,
    path: PathBuf,
    key: PathBuf,
}

impl FileGuard for SerializedGuard<'_> {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SerializedGuard<'_> {
    fn drop(&mut self) {
        self.owner.release(&self.key);
    }
}

impl FileAccess for SerializedAccess {
    fn acquire<'a>(&'a self, path: &Path) -> io::Result<Box<dyn FileGuard + 'a>> {
        let key = lock_key(path);
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(&key) {
            held = self.released.wait(held).unwrap_or_else(|e| e.into_inner());
        }
        held.insert(key.clone());

        Ok(Box::new(SerializedGuard {
            owner: self,
            path: path.to_path_buf(),
            key,
        }))
    }
}

/// Absolute form of `path` so `a.xml` and `./a.xml` share one lock
fn lock_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Write to a uniquely named sibling, then rename over `path`
///
/// A symlink is written through: its target is replaced, the link stays.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let resolved = match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    };
    let path = resolved.as_path();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        // keep the mode of the file being replaced
        if let Ok(existing) = fs::metadata(path) {
            fs::set_permissions(&temp, existing.permissions())?;
        }
        fs::rename(&temp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}
