//! Helper threads for long-running form routines.
//!
//! A blocked session is moved into the thread, so nothing on the reactor
//! can touch it until it comes back through the channel.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;

use tracing::{debug, warn};

use super::poller::Waker;
use super::session::Session;
use crate::vfs::FormFn;

/// Runs `routine` on its own thread and sends the session back when done.
pub fn spawn(
    mut session: Session,
    routine: FormFn,
    done: Sender<Session>,
    waker: Arc<Waker>,
) -> io::Result<()> {
    let id = session.id();
    thread::Builder::new()
        .name(format!("form-{id}"))
        .spawn(move || {
            debug!(session = id, "form worker started");
            let outcome = routine(&mut session);
            session.form_outcome = Some(outcome);
            if done.send(session).is_err() {
                warn!(session = id, "server gone before form finished");
                return;
            }
            waker.wake();
        })?;
    Ok(())
}
