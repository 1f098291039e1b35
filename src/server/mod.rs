//! The reactor.
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────── Server::tick ────────────┐
//!   listener ──accept─▶ registry (BTreeMap<id, Slot>)         │
//!                     │   HEADER/POSTRX ◀── readable          │
//!                     │   CONTENT ──────▶ content::run        │
//!                     │   SENDDATA ◀───── writable            │
//!                     │   BLOCKED ──────▶ worker ──mpsc──┐    │
//!                     │   ENDING / idle ─▶ dropped       │    │
//!                     └──────────────────────────────────┼────┘
//!                                 waker ◀────────────────┘
//! ```
//!
//! One thread owns the registry. A session handed to a worker leaves a
//! `Blocked` placeholder and comes back over a channel; if the idle reaper
//! removed the placeholder in the meantime the returning session is simply
//! dropped. Removing a slot from the map is the only way a session is
//! freed, so it happens exactly once.

pub mod listener;
pub mod poller;
pub mod session;
pub mod worker;

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::content::{self, Context, Hooks, Step};
use crate::error::{ServerError, ServerResult};
use crate::vfs::Vfs;

use poller::{PollSet, Waker};
use session::{Action, Session, SessionId, State};

enum Slot {
    Active(Session),
    /// Owned by a worker thread since `since`.
    Blocked { since: Instant },
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    /// A stop was requested; every session has been released.
    Stopped,
}

/// Stops a running server from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.waker.wake();
    }
}

pub struct Server {
    config: Config,
    vfs: Vfs,
    hooks: Hooks,
    listener: Option<TcpListener>,
    sessions: BTreeMap<SessionId, Slot>,
    next_id: SessionId,
    pollset: PollSet,
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
    returned_tx: Sender<Session>,
    returned_rx: Receiver<Session>,
    restarts: u32,
    last_error: Option<String>,
}

impl Server {
    pub fn new(config: Config, vfs: Vfs, hooks: Hooks) -> ServerResult<Self> {
        let waker = Waker::new().map_err(ServerError::Poll)?;
        let (returned_tx, returned_rx) = mpsc::channel();
        Ok(Self {
            config,
            vfs,
            hooks,
            listener: None,
            sessions: BTreeMap::new(),
            next_id: 1,
            pollset: PollSet::new(),
            waker: Arc::new(waker),
            stop: Arc::new(AtomicBool::new(false)),
            returned_tx,
            returned_rx,
            restarts: 0,
            last_error: None,
        })
    }

    /// Creates the listening socket on `config.listen_addr`.
    pub fn bind(&mut self) -> ServerResult<SocketAddr> {
        let listener = listener::bind(&self.config.listen_addr)?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: self.config.listen_addr.clone(),
            source,
        })?;
        self.listener = Some(listener);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: Arc::clone(&self.stop),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sessions in the registry, blocked ones included.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Listener restarts since the server was created.
    pub fn restart_count(&self) -> u32 {
        self.restarts
    }

    /// The transport error behind the most recent restart.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// One non-blocking tick, for owners that drive the server from their
    /// own loop.
    pub fn poll(&mut self) -> ServerResult<Status> {
        let status = self.tick(Duration::ZERO)?;
        if status == Status::Stopped {
            self.drain();
        }
        Ok(status)
    }

    /// Owns the calling thread until stopped.
    ///
    /// A transport error drops the listener; the next round binds a new
    /// one. Failed binds count as restarts too, and more than
    /// `max_restarts` failures in a row give up.
    pub fn run(&mut self) -> ServerResult<()> {
        let mut consecutive = 0u32;
        loop {
            let err = if self.listener.is_none() {
                match self.bind() {
                    Ok(_) => continue,
                    Err(e) => e,
                }
            } else {
                match self.tick(self.config.poll_timeout()) {
                    Ok(Status::Running) => {
                        consecutive = 0;
                        continue;
                    }
                    Ok(Status::Stopped) => {
                        self.drain();
                        return Ok(());
                    }
                    Err(e) => e,
                }
            };

            error!(error = %err, "listener failed, restarting");
            self.listener = None;
            self.restarts += 1;
            consecutive += 1;
            self.last_error = Some(err.to_string());
            if consecutive > self.config.max_restarts {
                self.drain();
                return Err(ServerError::RestartLimit {
                    restarts: consecutive,
                    last: err.to_string(),
                });
            }
            if self.stop.load(Ordering::SeqCst) {
                self.drain();
                return Ok(());
            }
            // back off before the next bind
            std::thread::sleep(self.config.poll_timeout());
        }
    }

    fn tick(&mut self, timeout: Duration) -> ServerResult<Status> {
        self.collect_returned();

        let listener_fd = self.listener.as_ref().ok_or(ServerError::NotBound)?.as_raw_fd();
        self.pollset.clear();
        let listen_slot = self.pollset.register(listener_fd, true, false);
        let wake_slot = self.pollset.register(self.waker.fd(), true, false);

        let mut watched = Vec::new();
        let mut runnable = false;
        for (id, slot) in &self.sessions {
            let Slot::Active(session) = slot else {
                continue;
            };
            let state = session.state();
            runnable |= matches!(state, State::Content | State::Ending);
            let read = matches!(state, State::Header | State::PostRx);
            let write = state == State::SendData;
            if let Some(fd) = session.raw_fd()
                && (read || write)
            {
                watched.push((*id, self.pollset.register(fd, read, write)));
            }
        }

        let timeout = if runnable { Duration::ZERO } else { timeout };
        self.pollset.wait(timeout).map_err(ServerError::Poll)?;

        if self.pollset.readable(wake_slot) {
            self.waker.drain();
        }
        if self.stop.load(Ordering::SeqCst) {
            info!("stop requested");
            return Ok(Status::Stopped);
        }
        self.collect_returned();

        if self.pollset.readable(listen_slot) {
            self.accept()?;
        }

        let ctx = Context::new(&self.config, &self.vfs, &self.hooks);
        let mut stopping = false;

        for (id, slot) in watched {
            let Some(Slot::Active(session)) = self.sessions.get_mut(&id) else {
                continue;
            };
            if self.pollset.readable(slot)
                && matches!(session.state(), State::Header | State::PostRx)
                && session.on_readable(&ctx)? == Action::Shutdown
            {
                stopping = true;
            }
            if self.pollset.writable(slot)
                && session.state() == State::SendData
                && let Err(e) = session.on_writable()
            {
                debug!(session = id, error = %e, "send failed");
                session.close();
            }
        }

        // sessions are serviced in registry order
        for (id, slot) in self.sessions.iter_mut() {
            let Slot::Active(session) = slot else {
                continue;
            };
            if session.state() != State::Content {
                continue;
            }
            match content::run(session, &ctx) {
                Ok(Step::Ready) => {
                    if session.state() == State::SendData
                        && let Err(e) = session.on_writable()
                    {
                        debug!(session = id, error = %e, "send failed");
                        session.close();
                    }
                }
                Ok(Step::Offload(routine)) => {
                    let blocked = Slot::Blocked {
                        since: Instant::now(),
                    };
                    if let Slot::Active(session) = std::mem::replace(slot, blocked) {
                        let done = self.returned_tx.clone();
                        let waker = Arc::clone(&self.waker);
                        if let Err(e) = worker::spawn(session, routine, done, waker) {
                            // the session went down with the closure; the
                            // placeholder is reaped as idle
                            error!(session = id, error = %e, "could not start form worker");
                        }
                    }
                }
                Err(e) => session.fail(&ctx.config.server_name, &e),
            }
        }

        self.reap();

        if stopping {
            return Ok(Status::Stopped);
        }
        Ok(Status::Running)
    }

    fn accept(&mut self) -> ServerResult<()> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(ServerError::NotBound);
        };
        let Some((stream, peer)) = listener::accept(listener, self.config.local_only)? else {
            return Ok(());
        };
        let id = self.next_id;
        self.next_id += 1;
        match Session::new(id, stream, peer, &self.config) {
            Ok(session) => {
                debug!(session = id, peer = %peer, "session created");
                self.sessions.insert(id, Slot::Active(session));
            }
            Err(e) => warn!(peer = %peer, error = %e, "could not set up session"),
        }
        Ok(())
    }

    /// Puts sessions back from workers, resuming them in CONTENT.
    fn collect_returned(&mut self) {
        while let Ok(mut session) = self.returned_rx.try_recv() {
            let id = session.id();
            match self.sessions.get_mut(&id) {
                Some(slot) if matches!(slot, Slot::Blocked { .. }) => {
                    debug!(session = id, "form worker finished");
                    session.state = State::Content;
                    session.touch();
                    *slot = Slot::Active(session);
                }
                _ => debug!(session = id, "form finished after session was reclaimed"),
            }
        }
    }

    /// Frees ended sessions and any session idle past the timeout.
    fn reap(&mut self) {
        let idle = self.config.idle_timeout();
        let now = Instant::now();
        self.sessions.retain(|id, slot| match slot {
            Slot::Active(session) if session.state() == State::Ending => {
                debug!(session = id, "session closed");
                false
            }
            Slot::Active(session) if now.duration_since(session.last_activity()) > idle => {
                info!(session = id, state = ?session.state(), "idle session reclaimed");
                false
            }
            Slot::Blocked { since } if now.duration_since(*since) > idle => {
                info!(session = id, "blocked session reclaimed");
                false
            }
            _ => true,
        });
    }

    /// Releases every session.
    fn drain(&mut self) {
        let count = self.sessions.len();
        self.sessions.clear();
        self.stop.store(false, Ordering::SeqCst);
        info!(sessions = count, "server stopped");
    }
}
