//! Readiness wait over `poll(2)`.
//!
//! The interest set is rebuilt every tick from session states, so a plain
//! `pollfd` array is all the bookkeeping needed.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[derive(Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.fds.clear();
    }

    /// Adds `fd` and returns its slot for the readiness queries.
    pub fn register(&mut self, fd: RawFd, read: bool, write: bool) -> usize {
        let mut events = 0;
        if read {
            events |= libc::POLLIN;
        }
        if write {
            events |= libc::POLLOUT;
        }
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.fds.len() - 1
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Blocks for at most `timeout`. An interrupted wait reports nothing
    /// ready.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                millis,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                for fd in &mut self.fds {
                    fd.revents = 0;
                }
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    /// Readable, or hung up / in error so that a read reports why.
    pub fn readable(&self, slot: usize) -> bool {
        self.fds
            .get(slot)
            .is_some_and(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
    }

    pub fn writable(&self, slot: usize) -> bool {
        self.fds
            .get(slot)
            .is_some_and(|p| p.revents & (libc::POLLOUT | libc::POLLHUP | libc::POLLERR) != 0)
    }
}

/// Self-pipe that interrupts a blocking wait from another thread.
#[derive(Debug)]
pub struct Waker {
    tx: UnixStream,
    rx: UnixStream,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = UnixStream::pair()?;
        tx.set_nonblocking(true)?;
        rx.set_nonblocking(true)?;
        Ok(Self { tx, rx })
    }

    pub fn wake(&self) {
        // a full pipe already guarantees a wakeup
        let _ = (&self.tx).write(&[1]);
    }

    /// Empties the pipe after a wakeup.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.rx).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }

    pub fn fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waker_makes_wait_return() {
        let waker = Waker::new().unwrap();
        let mut set = PollSet::new();
        let slot = set.register(waker.fd(), true, false);

        assert_eq!(set.wait(Duration::ZERO).unwrap(), 0);
        assert!(!set.readable(slot));

        waker.wake();
        assert_eq!(set.wait(Duration::from_secs(5)).unwrap(), 1);
        assert!(set.readable(slot));

        waker.drain();
        set.clear();
        let slot = set.register(waker.fd(), true, false);
        assert_eq!(set.wait(Duration::ZERO).unwrap(), 0);
        assert!(!set.readable(slot));
    }
}
