//! Host filesystem backend rooted at a directory.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use super::{Backend, FileHandle, OpenMode};

pub struct NativeFs {
    root: PathBuf,
    writable: bool,
}

impl NativeFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writable: false,
        }
    }

    /// Allows opening files for writing (PUT uploads) and removal.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins `name` under the root, refusing anything that could escape it.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        (safe && !name.is_empty()).then(|| self.root.join(relative))
    }
}

/// Handle over a `std::fs::File`, shared with the media backend.
pub(crate) struct NativeHandle {
    file: File,
}

impl NativeHandle {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }
}

impl FileHandle for NativeHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl Backend for NativeFs {
    fn name(&self) -> &'static str {
        "native"
    }

    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Option<Box<dyn FileHandle>>> {
        let Some(path) = self.resolve(name) else {
            tracing::warn!(name, "rejected path outside document root");
            return Ok(None);
        };

        let file = match mode {
            OpenMode::Read => {
                if path.is_dir() {
                    return Ok(None);
                }
                File::open(&path)
            }
            OpenMode::Write if self.writable => File::create(&path),
            OpenMode::Write => return Ok(None),
        };

        match file {
            Ok(file) => Ok(Some(Box::new(NativeHandle::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, name: &str) -> io::Result<bool> {
        if !self.writable {
            return Ok(false);
        }
        let Some(path) = self.resolve(name) else {
            return Ok(false);
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
