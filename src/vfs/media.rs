//! Removable media backend (SD card style, FAT naming).
//!
//! Names match case-insensitively, the volume is read-only, and nothing
//! opens while the mount point is missing.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use super::native::NativeHandle;
use super::{Backend, FileHandle, OpenMode};

pub struct RemovableMedia {
    mount: PathBuf,
}

impl RemovableMedia {
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.into(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.is_dir()
    }

    /// Walks `name` one component at a time, matching entries ignoring case.
    fn find(&self, name: &str) -> io::Result<Option<PathBuf>> {
        let mut current = self.mount.clone();
        for component in Path::new(name).components() {
            let Component::Normal(wanted) = component else {
                return Ok(None);
            };
            let wanted = wanted.to_string_lossy();
            let mut hit = None;
            for entry in fs::read_dir(&current)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().eq_ignore_ascii_case(&wanted) {
                    hit = Some(entry.path());
                    break;
                }
            }
            match hit {
                Some(path) => current = path,
                None => return Ok(None),
            }
        }
        Ok((current != self.mount).then_some(current))
    }
}

impl Backend for RemovableMedia {
    fn name(&self) -> &'static str {
        "media"
    }

    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Option<Box<dyn FileHandle>>> {
        if mode != OpenMode::Read {
            return Ok(None);
        }
        if !self.is_mounted() {
            tracing::debug!(mount = %self.mount.display(), "media not mounted");
            return Ok(None);
        }
        match self.find(name)? {
            Some(path) if path.is_file() => {
                Ok(Some(Box::new(NativeHandle::new(File::open(path)?))))
            }
            _ => Ok(None),
        }
    }
}
