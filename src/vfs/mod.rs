//! Virtual filesystem layer.
//!
//! Every resource the server reads or writes goes through [`Vfs`], which
//! owns an ordered list of [`Backend`] implementations and asks each in turn
//! to open a name. The first backend that produces a handle wins.
//!
//! ```text
//!   Vfs::open("index.htm")
//!        │
//!        ├─ EmbeddedFs      (compiled-in table, read-only)
//!        ├─ RemovableMedia  (case-insensitive, read-only, may be absent)
//!        └─ NativeFs        (host directory, optionally writable)
//! ```
//!
//! Backends may also authenticate access to a handle and drive server push;
//! both hooks are optional and default to "no hook".

pub mod embedded;
pub mod media;
pub mod native;

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::error::ContentError;
use crate::heap::{GuardedBuf, Tag};
use crate::http::auth::Credentials;
use crate::server::session::Session;

pub use embedded::{Authenticator, Contents, EmbeddedFile, EmbeddedFs, Flags, FormFn, PushFn, Routine, SsiFn};
pub use media::RemovableMedia;
pub use native::NativeFs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// What a push routine wants after its output has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Call the routine again once the socket drains.
    More,
    /// Close the connection.
    Done,
}

/// An open file on some backend. Dropping the handle closes it.
pub trait FileHandle: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only file"))
    }

    fn size(&self) -> io::Result<u64>;

    /// Table entry behind the handle when it came from the embedded backend.
    fn embedded(&self) -> Option<&'static EmbeddedFile> {
        None
    }
}

/// One storage implementation.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens `name`; `Ok(None)` means this backend does not have it.
    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Option<Box<dyn FileHandle>>>;

    /// Deletes `name`, returning whether anything was removed.
    fn remove(&self, _name: &str) -> io::Result<bool> {
        Ok(false)
    }

    /// Access check for an opened handle. `None` means the backend has no
    /// hook and admits everyone.
    fn authenticate(&self, _file: &dyn FileHandle, _creds: &Credentials) -> Option<bool> {
        None
    }

    /// Server push hook. `None` means the backend cannot push.
    fn push(
        &self,
        _file: &dyn FileHandle,
        _session: &mut Session,
    ) -> Option<Result<PushStatus, ContentError>> {
        None
    }
}

/// Ordered set of backends.
#[derive(Clone, Default)]
pub struct Vfs {
    backends: Vec<Arc<dyn Backend>>,
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a backend; earlier backends take priority.
    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn backends(&self) -> impl Iterator<Item = &Arc<dyn Backend>> {
        self.backends.iter()
    }

    /// Tries each backend in order and wraps the first handle produced.
    pub fn open(&self, name: &str, mode: OpenMode, buffer_size: usize) -> Option<Resource> {
        for backend in &self.backends {
            match backend.open(name, mode) {
                Ok(Some(handle)) => {
                    tracing::debug!(name, backend = backend.name(), ?mode, "opened resource");
                    return Some(Resource::new(name, handle, Arc::clone(backend), buffer_size));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(name, backend = backend.name(), error = %e, "open failed");
                }
            }
        }
        None
    }

    /// Best-effort removal from every backend.
    pub fn remove(&self, name: &str) -> bool {
        let mut removed = false;
        for backend in &self.backends {
            match backend.remove(name) {
                Ok(hit) => removed |= hit,
                Err(e) => tracing::warn!(name, backend = backend.name(), error = %e, "remove failed"),
            }
        }
        removed
    }
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}

/// An open file owned by a session, with its read-ahead buffer.
///
/// `filled` counts valid bytes in the buffer and `next` is the next byte
/// still to be scanned or sent.
pub struct Resource {
    name: String,
    handle: Box<dyn FileHandle>,
    backend: Arc<dyn Backend>,
    buf: GuardedBuf,
    filled: usize,
    next: usize,
    dispatched: bool,
}

impl Resource {
    pub fn new(
        name: &str,
        handle: Box<dyn FileHandle>,
        backend: Arc<dyn Backend>,
        buffer_size: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            handle,
            backend,
            buf: GuardedBuf::new(Tag::FILE_BUFFER, buffer_size.max(16)),
            filled: 0,
            next: 0,
            dispatched: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn handle(&self) -> &dyn FileHandle {
        self.handle.as_ref()
    }

    pub fn embedded(&self) -> Option<&'static EmbeddedFile> {
        self.handle.embedded()
    }

    pub fn size(&self) -> io::Result<u64> {
        self.handle.size()
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.handle.write(data)
    }

    pub fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.handle.write(data)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => data = &data[n..],
            }
        }
        Ok(())
    }

    pub fn authenticate(&self, creds: &Credentials) -> Option<bool> {
        self.backend.authenticate(self.handle.as_ref(), creds)
    }

    /// Bytes read but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.buf.as_slice()[self.next..self.filled]
    }

    pub fn consume(&mut self, n: usize) {
        self.next = (self.next + n).min(self.filled);
    }

    /// Moves unconsumed bytes to the front and reads into the free tail.
    ///
    /// Returns the number of new bytes; 0 means end of file or a full
    /// buffer (check [`Resource::is_full`]).
    pub fn fill(&mut self) -> io::Result<usize> {
        if self.next > 0 {
            self.buf.as_mut_slice().copy_within(self.next..self.filled, 0);
            self.filled -= self.next;
            self.next = 0;
        }
        if self.is_full() {
            return Ok(0);
        }
        let n = self.handle.read(&mut self.buf.as_mut_slice()[self.filled..])?;
        self.filled += n;
        Ok(n)
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.buf.len() && self.next == 0
    }

    /// Marks the resource as seen by the content pipeline, returning
    /// whether it already was.
    pub(crate) fn mark_dispatched(&mut self) -> bool {
        std::mem::replace(&mut self.dispatched, true)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("filled", &self.filled)
            .field("next", &self.next)
            .finish()
    }
}
