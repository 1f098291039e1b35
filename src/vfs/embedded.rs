//! Compiled-in file table.
//!
//! Entries are produced at build time and never change. Besides plain data
//! an entry can carry a generated-expression token or a routine (form
//! handler, code-backed include, push), selected by its [`Flags`].

use std::fmt;
use std::io;
use std::ops::BitOr;
use std::sync::Arc;

use super::{Backend, FileHandle, OpenMode, PushStatus};
use crate::error::ContentError;
use crate::http::auth::Credentials;
use crate::server::session::Session;

/// Capability bits of an embedded entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Code-generated include
    pub const SSI: Flags = Flags(0x0001);
    /// Form handler
    pub const FORM: Flags = Flags(0x0002);
    /// HTML that may contain directives
    pub const HTML: Flags = Flags(0x0004);
    /// Raw data, never scanned
    pub const DATA: Flags = Flags(0x0008);
    /// Server push routine
    pub const PUSH: Flags = Flags(0x0010);
    /// Access requires credentials
    pub const AUTH: Flags = Flags(0x0020);
    /// Prints a generated expression chosen by token
    pub const CEXP: Flags = Flags(0x0040);
    /// Run the routine on a worker thread
    pub const THREAD: Flags = Flags(0x0080);

    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 8] = [
            (Flags::SSI, "SSI"),
            (Flags::FORM, "FORM"),
            (Flags::HTML, "HTML"),
            (Flags::DATA, "DATA"),
            (Flags::PUSH, "PUSH"),
            (Flags::AUTH, "AUTH"),
            (Flags::CEXP, "CEXP"),
            (Flags::THREAD, "THREAD"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Flags({})", set.join("|"))
    }
}

/// Body of an entry: bytes, or the token handed to the expression printer.
#[derive(Debug, Clone, Copy)]
pub enum Contents {
    Data(&'static [u8]),
    Token(u32),
}

pub type SsiFn = fn(&mut Session) -> Result<(), ContentError>;
/// Returns `Err(message)` to have an error page rendered instead.
pub type FormFn = fn(&mut Session) -> Result<(), String>;
pub type PushFn = fn(&mut Session) -> Result<PushStatus, ContentError>;

#[derive(Clone, Copy)]
pub enum Routine {
    Ssi(SsiFn),
    Form(FormFn),
    Push(PushFn),
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Routine::Ssi(_) => "Ssi",
            Routine::Form(_) => "Form",
            Routine::Push(_) => "Push",
        })
    }
}

/// One immutable table entry.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedFile {
    pub name: &'static str,
    pub contents: Contents,
    pub routine: Option<Routine>,
    pub flags: Flags,
}

impl EmbeddedFile {
    pub const fn data(name: &'static str, data: &'static [u8], flags: Flags) -> Self {
        Self {
            name,
            contents: Contents::Data(data),
            routine: None,
            flags,
        }
    }

    pub const fn expression(name: &'static str, token: u32) -> Self {
        Self {
            name,
            contents: Contents::Token(token),
            routine: None,
            flags: Flags::CEXP,
        }
    }

    pub const fn ssi(name: &'static str, routine: SsiFn) -> Self {
        Self {
            name,
            contents: Contents::Data(b""),
            routine: Some(Routine::Ssi(routine)),
            flags: Flags::SSI,
        }
    }

    /// Form handler; add [`Flags::THREAD`] to run it off the reactor.
    pub const fn form(name: &'static str, routine: FormFn, extra: Flags) -> Self {
        Self {
            name,
            contents: Contents::Data(b""),
            routine: Some(Routine::Form(routine)),
            flags: Flags::FORM.union(extra),
        }
    }

    pub const fn push(name: &'static str, routine: PushFn) -> Self {
        Self {
            name,
            contents: Contents::Data(b""),
            routine: Some(Routine::Push(routine)),
            flags: Flags::PUSH,
        }
    }

    /// Bytes of a data entry; empty for tokens.
    pub fn bytes(&self) -> &'static [u8] {
        match self.contents {
            Contents::Data(data) => data,
            Contents::Token(_) => &[],
        }
    }

    pub fn token(&self) -> Option<u32> {
        match self.contents {
            Contents::Token(token) => Some(token),
            Contents::Data(_) => None,
        }
    }
}

/// Decides whether credentials admit a given entry.
pub type Authenticator = Arc<dyn Fn(&EmbeddedFile, &Credentials) -> bool + Send + Sync>;

/// Backend serving a static table.
#[derive(Clone)]
pub struct EmbeddedFs {
    table: &'static [EmbeddedFile],
    auth: Option<Authenticator>,
}

impl EmbeddedFs {
    pub fn new(table: &'static [EmbeddedFile]) -> Self {
        Self { table, auth: None }
    }

    pub fn with_authenticator(mut self, auth: Authenticator) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Installs an authenticator admitting `user`/`password` to entries
    /// flagged [`Flags::AUTH`] and everyone to the rest.
    pub fn with_credentials(self, user: &str, password: &str) -> Self {
        let user = user.to_string();
        let password = password.to_string();
        self.with_authenticator(Arc::new(move |file, creds| {
            !file.flags.contains(Flags::AUTH) || (creds.user == user && creds.password == password)
        }))
    }

    pub fn lookup(&self, name: &str) -> Option<&'static EmbeddedFile> {
        self.table.iter().find(|f| f.name == name)
    }
}

struct EmbeddedHandle {
    file: &'static EmbeddedFile,
    position: usize,
}

impl FileHandle for EmbeddedHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.file.bytes();
        let n = buf.len().min(data.len() - self.position);
        buf[..n].copy_from_slice(&data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.bytes().len() as u64)
    }

    fn embedded(&self) -> Option<&'static EmbeddedFile> {
        Some(self.file)
    }
}

impl Backend for EmbeddedFs {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Option<Box<dyn FileHandle>>> {
        if mode != OpenMode::Read {
            return Ok(None);
        }
        Ok(self.lookup(name).map(|file| {
            Box::new(EmbeddedHandle { file, position: 0 }) as Box<dyn FileHandle>
        }))
    }

    fn authenticate(&self, file: &dyn FileHandle, creds: &Credentials) -> Option<bool> {
        let auth = self.auth.as_ref()?;
        let entry = file.embedded()?;
        Some(auth(entry, creds))
    }

    fn push(
        &self,
        file: &dyn FileHandle,
        session: &mut Session,
    ) -> Option<Result<PushStatus, ContentError>> {
        match file.embedded()?.routine? {
            Routine::Push(routine) => Some(routine(session)),
            _ => None,
        }
    }
}
