//! Response body generation.
//!
//! The pipeline works on the session's resource stack. The top resource is
//! visited once to decide how it is handled (form routine, generated
//! expression, code include, push, binary streaming); ordinary text is then
//! scanned for directive markers and copied into the output chain.
//! An include pushes a new resource; when it hits end of file it is popped
//! and scanning of the wrapping file resumes right after the directive.

pub mod directive;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ContentError;
use crate::http::form::Form;
use crate::http::mime;
use crate::http::response::{Response, form_error_page};
use crate::http::writer::serialize_response;
use crate::server::session::{Session, State};
use crate::vfs::{EmbeddedFile, Flags, FormFn, OpenMode, Routine, Vfs};

use directive::{CLOSE, Directive, OPEN};

/// Handles `<!--#exec cmd_argument='...'-->`.
pub type ExecHook = Arc<dyn Fn(&mut Session, &str) -> Result<(), ContentError> + Send + Sync>;
/// Prints the generated expression named by a token.
pub type ExpressionHook = Arc<dyn Fn(&mut Session, u32) -> Result<(), ContentError> + Send + Sync>;

/// Application callbacks the pipeline dispatches to.
#[derive(Clone, Default)]
pub struct Hooks {
    pub exec: Option<ExecHook>,
    pub cexp: Option<ExpressionHook>,
}

impl Hooks {
    pub fn with_exec(
        mut self,
        hook: impl Fn(&mut Session, &str) -> Result<(), ContentError> + Send + Sync + 'static,
    ) -> Self {
        self.exec = Some(Arc::new(hook));
        self
    }

    pub fn with_expressions(
        mut self,
        hook: impl Fn(&mut Session, u32) -> Result<(), ContentError> + Send + Sync + 'static,
    ) -> Self {
        self.cexp = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("exec", &self.exec.is_some())
            .field("cexp", &self.cexp.is_some())
            .finish()
    }
}

/// Everything a session handler needs besides the session itself.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub config: &'a Config,
    pub vfs: &'a Vfs,
    pub hooks: &'a Hooks,
}

impl<'a> Context<'a> {
    pub fn new(config: &'a Config, vfs: &'a Vfs, hooks: &'a Hooks) -> Self {
        Self { config, vfs, hooks }
    }
}

/// How a content step ended.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// The session left CONTENT (normally for SENDDATA).
    Ready,
    /// A threaded form routine must run off the reactor. The session is
    /// already BLOCKED.
    Offload(FormFn),
}

enum Visit {
    Scan,
    Changed,
    Offload(FormFn),
}

/// Generates output until the resource stack empties, the session blocks,
/// or something fails.
pub fn run(session: &mut Session, ctx: &Context<'_>) -> Result<Step, ContentError> {
    if let Some(outcome) = session.form_outcome.take() {
        after_form(session, ctx, outcome)?;
    }

    loop {
        if session.flags.overflow {
            return Err(ContentError::OutputFull(ctx.config.max_output_bytes));
        }
        if session.state != State::Content {
            return Ok(Step::Ready);
        }
        let Some(top) = session.resources.last_mut() else {
            complete(session, ctx);
            return Ok(Step::Ready);
        };

        if !top.mark_dispatched() {
            match first_visit(session, ctx)? {
                Visit::Scan => {}
                Visit::Changed => continue,
                Visit::Offload(routine) => {
                    session.state = State::Blocked;
                    return Ok(Step::Offload(routine));
                }
            }
        }

        match scan(session)? {
            Some(body) => run_directive(session, ctx, &body)?,
            None => {
                if let Some(done) = session.resources.pop() {
                    debug!(session = session.id(), name = done.name(), "resource closed");
                }
            }
        }
    }
}

/// Decides how the top resource is served.
fn first_visit(session: &mut Session, ctx: &Context<'_>) -> Result<Visit, ContentError> {
    let depth = session.resources.len();
    let Some(top) = session.resources.last() else {
        return Ok(Visit::Changed);
    };
    let binary = depth == 1 && mime::file_type(top.name()).binary;

    if let Some(entry) = top.embedded() {
        if entry.flags.contains(Flags::FORM) {
            let Some(Routine::Form(routine)) = entry.routine else {
                return Err(ContentError::Hook(format!("{} has no form handler", entry.name)));
            };
            if entry.flags.contains(Flags::THREAD) {
                info!(session = session.id(), form = entry.name, "form handed to worker");
                return Ok(Visit::Offload(routine));
            }
            debug!(session = session.id(), form = entry.name, "form handled inline");
            let outcome = routine(session);
            after_form(session, ctx, outcome)?;
            return Ok(Visit::Changed);
        }
        if entry.flags.contains(Flags::CEXP) || entry.flags.contains(Flags::SSI) {
            session.resources.pop();
            run_code(session, ctx, entry)?;
            return Ok(Visit::Changed);
        }
        if entry.flags.contains(Flags::PUSH) && depth == 1 {
            let head = Response::reply_head(&ctx.config.server_name, session.content_type, None, false);
            session.output.prepend(&serialize_response(&head));
            session.flags.push = true;
            session.flags.persistent = false;
            session.flags.header_sent = true;
            session.state = State::SendData;
            return Ok(Visit::Changed);
        }
    }

    if binary {
        let size = top.size()?;
        info!(session = session.id(), name = top.name(), size, "streaming binary");
        let head = Response::reply_head(
            &ctx.config.server_name,
            session.content_type,
            Some(size),
            session.flags.persistent,
        );
        session.output.prepend(&serialize_response(&head));
        session.flags.binary = true;
        session.flags.header_sent = true;
        session.state = State::SendData;
        return Ok(Visit::Changed);
    }

    Ok(Visit::Scan)
}

/// Applies what a form routine left behind: an error page, a redirect, or
/// a replacement resource.
fn after_form(
    session: &mut Session,
    ctx: &Context<'_>,
    outcome: Result<(), String>,
) -> Result<(), ContentError> {
    if let Err(message) = outcome {
        warn!(session = session.id(), message, "form rejected");
        session.output.clear();
        session.resources.clear();
        session.flags.header_sent = false;
        session.content_type = mime::file_type("").mime;
        return session.write_bytes(form_error_page(&message).as_bytes());
    }

    if session.flags.header_sent {
        session.resources.clear();
        session.state = State::SendData;
        return Ok(());
    }

    let Some(target) = session.pending_serve.take() else {
        return Ok(());
    };
    let (name, query) = match target.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (target.as_str(), None),
    };
    session.resources.pop();
    session.output.clear();
    if let Some(query) = query {
        let form = Form::parse(query.as_bytes())?;
        session.forms.push(form);
    }
    let resource = ctx
        .vfs
        .open(name, OpenMode::Read, ctx.config.fs_buffer_size)
        .ok_or_else(|| ContentError::NotFound(name.to_string()))?;
    debug!(session = session.id(), name, "serving in place of form");
    session.content_type = mime::file_type(name).mime;
    session.resources.push(resource);
    Ok(())
}

/// Runs a generated expression or a code-backed include.
fn run_code(
    session: &mut Session,
    ctx: &Context<'_>,
    entry: &'static EmbeddedFile,
) -> Result<(), ContentError> {
    if let Some(token) = entry.token() {
        return match &ctx.hooks.cexp {
            Some(print) => print(session, token),
            None => {
                debug!(session = session.id(), token, "no expression printer installed");
                Ok(())
            }
        };
    }
    match entry.routine {
        Some(Routine::Ssi(routine)) => routine(session),
        _ => {
            debug!(session = session.id(), name = entry.name, "code include has no routine");
            Ok(())
        }
    }
}

/// Copies text from the top resource into the output until a complete
/// directive is found (its body is returned) or the file ends (`None`).
fn scan(session: &mut Session) -> Result<Option<String>, ContentError> {
    let Some(resource) = session.resources.last_mut() else {
        return Ok(None);
    };
    let output = &mut session.output;

    loop {
        let pending = resource.pending();
        if let Some(start) = directive::find(pending, OPEN) {
            output.push(&pending[..start])?;
            resource.consume(start);

            let pending = resource.pending();
            if let Some(len) = directive::find(&pending[OPEN.len()..], CLOSE) {
                let body = String::from_utf8_lossy(&pending[OPEN.len()..OPEN.len() + len]).into_owned();
                resource.consume(OPEN.len() + len + CLOSE.len());
                return Ok(Some(body));
            }
            // directive continues past the buffered bytes
            if resource.fill()? == 0 {
                if resource.is_full() {
                    return Err(ContentError::Format("directive longer than the read buffer"));
                }
                let rest = resource.pending().len();
                output.push(resource.pending())?;
                resource.consume(rest);
                return Ok(None);
            }
            continue;
        }

        let emit = pending.len() - directive::partial_open(pending);
        output.push(&pending[..emit])?;
        resource.consume(emit);
        if resource.fill()? == 0 {
            let rest = resource.pending().len();
            output.push(resource.pending())?;
            resource.consume(rest);
            return Ok(None);
        }
    }
}

fn run_directive(session: &mut Session, ctx: &Context<'_>, body: &str) -> Result<(), ContentError> {
    match Directive::parse(body)? {
        Directive::Include { file, query } => include(session, ctx, file, query),
        Directive::Exec { argument } => match &ctx.hooks.exec {
            Some(exec) => exec(session, argument),
            None => {
                debug!(session = session.id(), argument, "no exec hook installed");
                Ok(())
            }
        },
        Directive::Other(name) => {
            debug!(session = session.id(), directive = name, "ignoring directive");
            Ok(())
        }
    }
}

/// Opens an included file on top of the stack, or runs it on the spot when
/// it is code-backed. A missing file is skipped.
fn include(
    session: &mut Session,
    ctx: &Context<'_>,
    file: &str,
    query: Option<&str>,
) -> Result<(), ContentError> {
    let depth = session.resources.len();
    if depth >= ctx.config.max_include_depth {
        return Err(ContentError::IncludeDepth(ctx.config.max_include_depth));
    }

    let mut layered = false;
    if let Some(query) = query {
        match Form::parse(query.as_bytes()) {
            Ok(form) => {
                session.forms.push(form);
                layered = true;
            }
            Err(e) => warn!(session = session.id(), file, error = %e, "bad include query"),
        }
    }

    let Some(resource) = ctx.vfs.open(file, OpenMode::Read, ctx.config.fs_buffer_size) else {
        warn!(session = session.id(), file, "included file not found");
        if layered {
            session.forms.pop();
        }
        return Ok(());
    };

    match resource.embedded() {
        Some(entry) if entry.flags.contains(Flags::CEXP) || entry.flags.contains(Flags::SSI) => {
            drop(resource);
            let result = run_code(session, ctx, entry);
            if layered {
                session.forms.pop();
            }
            result
        }
        _ => {
            debug!(session = session.id(), file, depth = depth + 1, "include pushed");
            session.resources.push(resource);
            Ok(())
        }
    }
}

/// Prepends the reply head now that the body length is known.
fn complete(session: &mut Session, ctx: &Context<'_>) {
    let len = session.output.body_len();
    if !session.flags.header_sent {
        let head = Response::reply_head(
            &ctx.config.server_name,
            session.content_type,
            Some(len as u64),
            session.flags.persistent,
        );
        session.output.prepend(&serialize_response(&head));
        session.flags.header_sent = true;
    }
    debug!(session = session.id(), bytes = len, "content complete");
    session.state = State::SendData;
}

#[cfg(test)]
mod tests {
    use super::*;

    static SITE: &[EmbeddedFile] = &[
        EmbeddedFile::data(
            "page.htm",
            b"<h1><!--#include file=\"title.htm\"--></h1><!--#exec cmd_argument='x'--><p>end</p>",
            Flags::HTML,
        ),
        EmbeddedFile::data("title.htm", b"Hello", Flags::HTML),
        EmbeddedFile::data("loop.htm", b"[<!--#include file=\"loop.htm\"-->]", Flags::HTML),
    ];

    fn body(out: &[u8]) -> &[u8] {
        let at = directive::find(out, b"\r\n\r\n").unwrap();
        &out[at + 4..]
    }

    fn request(ctx: &Context<'_>, config: &Config, uri: &str) -> Session {
        let mut session = Session::detached(1, config);
        session.receive(ctx, format!("GET /{uri} HTTP/1.1\r\n\r\n").as_bytes());
        assert_eq!(session.state(), State::Content);
        session
    }

    #[test]
    fn include_and_exec_expand_in_place() {
        let config = Config::default();
        let vfs = Vfs::new().with_backend(crate::vfs::EmbeddedFs::new(SITE));
        let hooks = Hooks::default().with_exec(|s, arg| {
            s.write_bytes(format!("<{arg}>").as_bytes())
        });
        let ctx = Context::new(&config, &vfs, &hooks);

        let mut session = request(&ctx, &config, "page.htm");
        assert!(matches!(run(&mut session, &ctx), Ok(Step::Ready)));
        assert_eq!(session.state(), State::SendData);
        assert_eq!(session.open_resources(), 0);

        let out = session.drain_output();
        assert_eq!(body(&out), b"<h1>Hello</h1><x><p>end</p>");
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("Content-Length: 27\r\n"));
    }

    #[test]
    fn runaway_include_hits_depth_limit() {
        let config = Config {
            max_include_depth: 3,
            ..Config::default()
        };
        let vfs = Vfs::new().with_backend(crate::vfs::EmbeddedFs::new(SITE));
        let hooks = Hooks::default();
        let ctx = Context::new(&config, &vfs, &hooks);

        let mut session = request(&ctx, &config, "loop.htm");
        assert!(matches!(
            run(&mut session, &ctx),
            Err(ContentError::IncludeDepth(3))
        ));
    }
}
