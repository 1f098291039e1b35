//! Pages compiled into the demo binary.

use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use vane::content::Hooks;
use vane::error::ContentError;
use vane::heap;
use vane::vfs::{EmbeddedFile, EmbeddedFs, Flags};
use vane::Session;

const LOCALTIME: u32 = 4;
const WEATHER: u32 = 5;

static STARTED: OnceLock<Instant> = OnceLock::new();

pub static PAGES: &[EmbeddedFile] = &[
    EmbeddedFile::data(
        "index.htm",
        b"<html><head><title>Vane</title></head><body>\r\n\
<!--#include file=\"banner.htm\"-->\r\n\
<p>Local time: <!--#include file=\"localtime.cexp\"--></p>\r\n\
<p>Weather: <!--#include file=\"weather.cexp\"--></p>\r\n\
<p>Up <!--#exec cmd_argument='uptime'--> seconds</p>\r\n\
<!--#include file=\"heap.ssi\"-->\r\n\
<form action=\"station.cgi\" method=\"POST\">\r\n\
Station name: <input name=\"station\"> <input type=\"submit\" value=\"Save\">\r\n\
</form>\r\n\
<p><a href=\"private.htm\">Private page</a> | <a href=\"home.cgi\">Home</a></p>\r\n\
</body></html>\r\n",
        Flags::HTML,
    ),
    EmbeddedFile::data(
        "banner.htm",
        b"<h2>Weather station</h2>",
        Flags::HTML,
    ),
    EmbeddedFile::data(
        "saved.htm",
        b"<html><body>\r\n<!--#include file=\"banner.htm\"-->\r\n\
<p>Station renamed to <b><!--#exec cmd_argument='station'--></b>.</p>\r\n\
<p><a href=\"index.htm\">Back</a></p>\r\n</body></html>\r\n",
        Flags::HTML,
    ),
    EmbeddedFile::data(
        "private.htm",
        b"<html><body>\r\n<!--#include file=\"banner.htm\"-->\r\n\
<p>Only guests with the tourist password see this.</p>\r\n</body></html>\r\n",
        Flags::HTML.union(Flags::AUTH),
    ),
    EmbeddedFile::expression("localtime.cexp", LOCALTIME),
    EmbeddedFile::expression("weather.cexp", WEATHER),
    EmbeddedFile::ssi("heap.ssi", heap_status),
    EmbeddedFile::form("station.cgi", rename_station, Flags::THREAD),
    EmbeddedFile::form("home.cgi", go_home, Flags::NONE),
];

pub fn backend() -> EmbeddedFs {
    STARTED.get_or_init(Instant::now);
    EmbeddedFs::new(PAGES).with_credentials("guest", "tourist")
}

pub fn hooks() -> Hooks {
    Hooks::default()
        .with_exec(exec)
        .with_expressions(expression)
}

fn exec(session: &mut Session, argument: &str) -> Result<(), ContentError> {
    match argument {
        "uptime" => {
            let up = STARTED.get().map_or(0, |t| t.elapsed().as_secs());
            write!(session, "{up}").map_err(|_| ContentError::Hook("output full".into()))
        }
        "station" => {
            let name = escape(session.form_value("station").unwrap_or_default());
            session.write_bytes(name.as_bytes())
        }
        other => Err(ContentError::Hook(format!("unknown command {other}"))),
    }
}

fn expression(session: &mut Session, token: u32) -> Result<(), ContentError> {
    let text = match token {
        LOCALTIME => chrono::Local::now()
            .format("%a %b %e %H:%M:%S %Y")
            .to_string(),
        WEATHER => "-- No weather available --".to_string(),
        _ => {
            session.write_bytes(b"<Undefined variable>")?;
            return Err(ContentError::Hook(format!("undefined variable {token}")));
        }
    };
    session.write_bytes(text.as_bytes())
}

fn heap_status(session: &mut Session) -> Result<(), ContentError> {
    let stats = heap::stats();
    write!(
        session,
        "<p>Heap: {} blocks, {} bytes in use, {} bytes peak, {} blocks allocated in total</p>",
        stats.blocks, stats.bytes, stats.max_bytes, stats.total_blocks
    )
    .map_err(|_| ContentError::Hook("output full".into()))
}

/// Runs on a worker; saving the setting stands in for slow device I/O.
fn rename_station(session: &mut Session) -> Result<(), String> {
    let name = session
        .form_value("station")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "station name is required".to_string())?
        .to_string();
    std::thread::sleep(Duration::from_millis(200));
    tracing::info!(station = %name, "station renamed");
    session.serve("saved.htm");
    Ok(())
}

fn go_home(session: &mut Session) -> Result<(), String> {
    session.redirect("/index.htm");
    Ok(())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
