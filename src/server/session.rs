//! Per-connection state machine.
//!
//! ```text
//!   HEADER ──GET──────────────▶ CONTENT ──▶ SENDDATA ──▶ ENDING
//!     │                            ▲  │         │
//!     ├─POST/PUT─▶ POSTRX ─────────┘  │         └─keep-alive─▶ HEADER
//!     │                               └─threaded form─▶ BLOCKED ─▶ CONTENT
//!     └─error─────────────────────────────────────────────────▶ ENDING
//! ```
//!
//! Only the poller and the content pipeline move a session between states.
//! Every state has its own handler here; the poller decides which one to
//! call from socket readiness.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Instant;

use bytes::{Buf, BytesMut};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::content::Context;
use crate::error::{ContentError, ServerError};
use crate::http::auth::Credentials;
use crate::http::form::{Form, url_decode};
use crate::http::mime;
use crate::http::parser::{ParseError, parse_request};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::{Flush, OutputChain, serialize_response};
use crate::vfs::{OpenMode, PushStatus, Resource};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Reading the request line and headers.
    Header,
    /// Reading a POST body or streaming a PUT upload.
    PostRx,
    /// Generating the response body.
    Content,
    /// Flushing output to the socket.
    SendData,
    /// Torn down on the next tick.
    Ending,
    /// Handed to a worker thread.
    Blocked,
}

/// What the poller should do after feeding a session input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// The configured shutdown URI was requested.
    Shutdown,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SessionFlags {
    /// Streaming a binary resource straight from its backend.
    pub binary: bool,
    /// Status line already queued; no head is prepended on completion.
    pub header_sent: bool,
    pub persistent: bool,
    /// Part of a request head has arrived.
    pub reading: bool,
    /// The top resource is re-polled for more output.
    pub push: bool,
    /// A routine tried to write past the output limit.
    pub overflow: bool,
}

/// A PUT in progress.
struct Upload {
    resource: Resource,
    remaining: usize,
}

pub struct Session {
    id: SessionId,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    pub(crate) state: State,
    rx: BytesMut,
    rx_capacity: usize,
    request: Option<Request>,
    pub(crate) output: OutputChain,
    /// Open files, innermost include last.
    pub(crate) resources: Vec<Resource>,
    /// Decoded forms, newest last.
    pub(crate) forms: Vec<Form>,
    pub(crate) flags: SessionFlags,
    pub(crate) content_type: &'static str,
    /// Set by [`Session::serve`], picked up by the pipeline.
    pub(crate) pending_serve: Option<String>,
    /// Result of a form routine that ran on a worker.
    pub(crate) form_outcome: Option<Result<(), String>>,
    upload: Option<Upload>,
    last_error: Option<StatusCode>,
    last_activity: Instant,
    server_name: String,
}

impl Session {
    /// Wraps an accepted connection, switching it to non-blocking mode.
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        peer: SocketAddr,
        config: &Config,
    ) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::build(id, Some(stream), Some(peer), config))
    }

    /// A session with no socket. Input is fed through [`Session::receive`]
    /// and output collected with [`Session::drain_output`].
    pub fn detached(id: SessionId, config: &Config) -> Self {
        Self::build(id, None, None, config)
    }

    fn build(
        id: SessionId,
        stream: Option<TcpStream>,
        peer: Option<SocketAddr>,
        config: &Config,
    ) -> Self {
        Self {
            id,
            stream,
            peer,
            state: State::Header,
            rx: BytesMut::with_capacity(config.rx_buffer_size),
            rx_capacity: config.rx_buffer_size,
            request: None,
            output: OutputChain::new(config.tx_segment_size, config.max_output_bytes),
            resources: Vec::new(),
            forms: Vec::new(),
            flags: SessionFlags::default(),
            content_type: mime::file_type("").mime,
            pending_serve: None,
            form_outcome: None,
            upload: None,
            last_error: None,
            last_activity: Instant::now(),
            server_name: config.server_name.clone(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Name of the requested resource, empty before a request is parsed.
    pub fn uri(&self) -> &str {
        self.request.as_ref().map_or("", |r| r.uri.as_str())
    }

    /// Looks `name` up in the decoded forms, newest first.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.forms.iter().rev().find_map(|f| f.get(name))
    }

    pub fn forms(&self) -> &[Form] {
        &self.forms
    }

    /// Number of resources currently open.
    pub fn open_resources(&self) -> usize {
        self.resources.len()
    }

    pub fn header_sent(&self) -> bool {
        self.flags.header_sent
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.persistent
    }

    /// Status of the last error reply sent on this session.
    pub fn last_error(&self) -> Option<StatusCode> {
        self.last_error
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    /// Appends generated body bytes.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), ContentError> {
        let result = self.output.push(data);
        if result.is_err() {
            self.flags.overflow = true;
        }
        result
    }

    /// Replaces the response with a `302 Found`. Meant for form routines.
    pub fn redirect(&mut self, location: &str) {
        debug!(session = self.id, location, "redirect");
        self.output.clear();
        let head = serialize_response(&Response::redirect(&self.server_name, location));
        if self.output.push(&head).is_err() {
            self.flags.overflow = true;
        }
        self.flags.header_sent = true;
    }

    /// Serves another resource in place of the form. `name` may carry
    /// `?name=value` pairs, which are decoded as a form.
    pub fn serve(&mut self, name: &str) {
        self.pending_serve = Some(name.to_string());
    }

    /// Takes everything queued for output, head included.
    pub fn drain_output(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        // a Vec never blocks
        let _ = self.output.flush(&mut out);
        out
    }

    /// Feeds bytes as though they had just been read from the socket.
    pub fn receive(&mut self, ctx: &Context<'_>, data: &[u8]) -> Action {
        self.rx.extend_from_slice(data);
        self.touch();
        self.process_input(ctx)
    }

    /// Reads what the socket has and advances the request.
    ///
    /// Client resets end just this session; any other receive error is
    /// returned as fatal to the tick.
    pub(crate) fn on_readable(&mut self, ctx: &Context<'_>) -> Result<Action, ServerError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Action::Continue);
        };

        let start = self.rx.len();
        if start >= self.rx_capacity {
            return Ok(self.process_input(ctx));
        }
        self.rx.resize(self.rx_capacity, 0);
        let read = stream.read(&mut self.rx[start..]);
        match read {
            Ok(0) => {
                self.rx.truncate(start);
                debug!(session = self.id, "peer closed");
                self.close();
                Ok(Action::Continue)
            }
            Ok(n) => {
                self.rx.truncate(start + n);
                self.touch();
                Ok(self.process_input(ctx))
            }
            Err(e) => {
                self.rx.truncate(start);
                match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(Action::Continue),
                    io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe => {
                        debug!(session = self.id, error = %e, "connection reset");
                        self.close();
                        Ok(Action::Continue)
                    }
                    _ => Err(ServerError::Recv(e)),
                }
            }
        }
    }

    fn process_input(&mut self, ctx: &Context<'_>) -> Action {
        match self.state {
            State::Header => self.on_header(ctx),
            State::PostRx if self.upload.is_some() => {
                self.on_upload(ctx);
                Action::Continue
            }
            State::PostRx => {
                self.on_body(ctx);
                Action::Continue
            }
            // no pipelining; later bytes wait for the next request
            _ => Action::Continue,
        }
    }

    /// HEADER: waits for the blank line, then starts the request.
    fn on_header(&mut self, ctx: &Context<'_>) -> Action {
        let server = ctx.config.server_name.as_str();
        let req = match parse_request(&self.rx, &ctx.config.default_document) {
            Ok(Some(req)) => req,
            Ok(None) => {
                self.flags.reading = !self.rx.is_empty();
                if self.rx.len() >= self.rx_capacity {
                    warn!(session = self.id, "request head overflowed receive buffer");
                    self.send_error(server, ParseError::HeaderTooLarge.status(), None);
                }
                return Action::Continue;
            }
            Err(e) => {
                warn!(session = self.id, error = %e, "bad request");
                self.send_error(server, e.status(), None);
                return Action::Continue;
            }
        };

        info!(session = self.id, method = req.method.as_str(), uri = %req.uri, "request");
        self.flags.reading = false;
        self.flags.persistent = ctx.config.keep_alive && req.keep_alive();

        if req.method == Method::GET && ctx.config.shutdown_uri.as_deref() == Some(req.uri.as_str()) {
            info!(session = self.id, "shutdown requested");
            let reply = ResponseBuilder::new(StatusCode::Accepted)
                .header("Server", server)
                .header("Connection", "close")
                .build();
            self.send_direct(&serialize_response(&reply));
            self.close();
            return Action::Shutdown;
        }

        match req.method {
            Method::GET => self.start_get(ctx, req),
            Method::POST => self.start_post(ctx, req),
            Method::PUT => self.start_put(ctx, req),
        }
        Action::Continue
    }

    fn start_get(&mut self, ctx: &Context<'_>, req: Request) {
        let server = ctx.config.server_name.as_str();
        self.rx.advance(req.header_len);
        if let Some(query) = &req.query {
            match Form::parse(query.as_bytes()) {
                Ok(form) => self.forms.push(form),
                Err(e) => {
                    warn!(session = self.id, error = %e, "bad query");
                    let uri = req.uri.clone();
                    self.request = Some(req);
                    self.send_error(server, StatusCode::BadRequest, Some(&uri));
                    return;
                }
            }
        }
        let uri = req.uri.clone();
        self.request = Some(req);
        match self.open_target(ctx, &uri) {
            Ok(()) => self.state = State::Content,
            Err(status) => self.send_error(server, status, Some(&uri)),
        }
    }

    fn start_post(&mut self, ctx: &Context<'_>, req: Request) {
        let server = ctx.config.server_name.as_str();
        let uri = req.uri.clone();
        let fits = body_end(&req).is_some_and(|end| end <= self.rx_capacity);
        if !fits {
            warn!(session = self.id, length = req.content_length, "post body too large");
            self.request = Some(req);
            self.send_error(server, ParseError::BodyTooLarge.status(), Some(&uri));
            return;
        }
        self.request = Some(req);
        match self.open_target(ctx, &uri) {
            Ok(()) => {
                self.state = State::PostRx;
                self.on_body(ctx);
            }
            Err(status) => self.send_error(server, status, Some(&uri)),
        }
    }

    /// POSTRX: waits for `Content-Length` body bytes and decodes them.
    fn on_body(&mut self, ctx: &Context<'_>) {
        let Some(req) = self.request.as_ref() else {
            return;
        };
        let Some(need) = body_end(req) else {
            return;
        };
        if self.rx.len() < need {
            return;
        }
        let body = &self.rx[req.header_len..need];
        if !body.is_empty() {
            match Form::parse(body) {
                Ok(form) => self.forms.push(form),
                Err(e) => {
                    warn!(session = self.id, error = %e, "bad form body");
                    let uri = req.uri.clone();
                    self.send_error(&ctx.config.server_name, StatusCode::BadRequest, Some(&uri));
                    return;
                }
            }
        }
        self.rx.advance(need);
        self.state = State::Content;
    }

    fn start_put(&mut self, ctx: &Context<'_>, req: Request) {
        let server = ctx.config.server_name.as_str();
        let name = url_decode(req.uri.as_bytes())
            .map(|n| String::from_utf8_lossy(&n).into_owned())
            .unwrap_or_else(|_| req.uri.clone());
        self.rx.advance(req.header_len);
        let remaining = req.content_length;
        self.request = Some(req);

        let Some(resource) = ctx.vfs.open(&name, OpenMode::Write, ctx.config.fs_buffer_size) else {
            warn!(session = self.id, name, "put target not writable");
            self.send_error(server, StatusCode::ServiceUnavailable, Some(&name));
            return;
        };
        self.upload = Some(Upload { resource, remaining });
        self.state = State::PostRx;
        self.on_upload(ctx);
    }

    /// POSTRX for PUT: streams received bytes into the target file.
    fn on_upload(&mut self, ctx: &Context<'_>) {
        let Some(upload) = self.upload.as_mut() else {
            return;
        };
        let take = self.rx.len().min(upload.remaining);
        let written = upload.resource.write_all(&self.rx[..take]);
        self.rx.advance(take);
        upload.remaining -= take;

        let server = ctx.config.server_name.as_str();
        match written {
            Err(e) => {
                let name = upload.resource.name().to_string();
                warn!(session = self.id, name, error = %e, "put write failed");
                self.upload = None;
                ctx.vfs.remove(&name);
                self.send_error(server, StatusCode::NotImplemented, Some(&name));
            }
            Ok(()) if upload.remaining == 0 => {
                info!(session = self.id, name = upload.resource.name(), "put complete");
                self.upload = None;
                let head = Response::reply_head(server, "text/html", Some(0), self.flags.persistent);
                self.output.prepend(&serialize_response(&head));
                self.flags.header_sent = true;
                self.state = State::SendData;
            }
            Ok(()) => {}
        }
    }

    /// Opens `name` for reading and checks the client's credentials
    /// against it.
    pub(crate) fn open_target(&mut self, ctx: &Context<'_>, name: &str) -> Result<(), StatusCode> {
        let Some(resource) = ctx.vfs.open(name, OpenMode::Read, ctx.config.fs_buffer_size) else {
            return Err(StatusCode::NotFound);
        };
        let creds = self
            .request
            .as_ref()
            .and_then(|r| r.authorization.as_deref())
            .map(Credentials::from_header)
            .unwrap_or_default();
        if resource.authenticate(&creds) == Some(false) {
            info!(session = self.id, name, user = %creds.user, "authentication required");
            return Err(StatusCode::Unauthorized);
        }
        self.content_type = mime::file_type(name).mime;
        self.resources.push(resource);
        Ok(())
    }

    /// SENDDATA: flushes queued output, then streams a binary resource or
    /// re-polls a push routine. Errors end only this session.
    pub(crate) fn on_writable(&mut self) -> io::Result<()> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            let before = self.output.pending_bytes();
            let flushed = self.output.flush(stream)?;
            if self.output.pending_bytes() != before {
                self.last_activity = Instant::now();
            }
            if flushed == Flush::Pending {
                return Ok(());
            }

            if self.flags.binary {
                let Some(resource) = self.resources.last_mut() else {
                    break;
                };
                if resource.pending().is_empty() && resource.fill()? == 0 {
                    break;
                }
                match stream.write(resource.pending()) {
                    Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => {
                        resource.consume(n);
                        self.last_activity = Instant::now();
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
                continue;
            }

            if self.flags.push {
                match self.push_more() {
                    Some(PushStatus::More) if self.output.is_empty() => return Ok(()),
                    Some(PushStatus::More) => continue,
                    // send the final chunk before closing
                    Some(PushStatus::Done) if !self.output.is_empty() => {
                        self.flags.push = false;
                        continue;
                    }
                    _ => break,
                }
            }
            break;
        }
        self.finish_response();
        Ok(())
    }

    /// Runs the push hook of the top resource.
    fn push_more(&mut self) -> Option<PushStatus> {
        let resource = self.resources.pop()?;
        let backend = resource.backend().clone();
        let status = backend.push(resource.handle(), self);
        self.resources.push(resource);
        match status {
            Some(Ok(status)) => Some(status),
            Some(Err(e)) => {
                warn!(session = self.id, error = %e, "push routine failed");
                None
            }
            None => None,
        }
    }

    /// Completion policy: back to HEADER for persistent connections,
    /// otherwise close.
    fn finish_response(&mut self) {
        debug!(session = self.id, uri = %self.uri(), "response complete");
        self.resources.clear();
        self.forms.clear();
        self.pending_serve = None;
        self.form_outcome = None;
        if self.flags.persistent && !self.flags.push {
            self.flags = SessionFlags::default();
            self.output.clear();
            self.request = None;
            self.content_type = mime::file_type("").mime;
            self.state = State::Header;
        } else {
            self.close();
        }
    }

    /// Answers a content failure: an error page while nothing has been
    /// sent, a bare close otherwise.
    pub(crate) fn fail(&mut self, server: &str, error: &ContentError) {
        warn!(session = self.id, uri = %self.uri(), error = %error, "content failed");
        if self.flags.header_sent {
            self.close();
            return;
        }
        let uri = self.uri().to_string();
        self.send_error(server, error.status(), Some(&uri));
    }

    /// Writes an error reply straight to the socket and ends the session.
    pub(crate) fn send_error(&mut self, server: &str, status: StatusCode, uri: Option<&str>) {
        debug!(session = self.id, status = status.as_u16(), "error reply");
        self.last_error = Some(status);
        self.output.clear();
        self.send_direct(&serialize_response(&Response::error(status, server, uri)));
        self.close();
    }

    /// Best-effort write that bypasses the output chain.
    fn send_direct(&mut self, bytes: &[u8]) {
        if let Some(stream) = self.stream.as_mut()
            && let Err(e) = stream.write_all(bytes)
        {
            debug!(session = self.id, error = %e, "direct reply not fully sent");
        }
    }

    /// Closes the socket and releases every owned resource.
    pub(crate) fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Write);
        }
        self.resources.clear();
        self.upload = None;
        self.state = State::Ending;
    }
}

/// Offset just past the declared body; `None` when the client-supplied
/// length overflows.
fn body_end(req: &Request) -> Option<usize> {
    req.header_len.checked_add(req.content_length)
}

impl fmt::Write for Session {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("uri", &self.uri())
            .field("resources", &self.resources.len())
            .finish()
    }
}
