//! Guarded buffers and heap accounting.
//!
//! Every long-lived buffer the server hands out (output segments, resource
//! read buffers) comes from [`GuardedBuf`]. The backing allocation carries a
//! four byte tag and the payload length in front of the payload and the same
//! tag behind it. Dropping the buffer verifies both guards; a mismatch means
//! memory was trampled somewhere and the process aborts on the spot.
//!
//! Live block/byte counters and the high-water mark are process wide so
//! status pages can report them.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

const TAG_LEN: usize = 4;
const LEN_LEN: usize = 4;
const HEADER_LEN: usize = TAG_LEN + LEN_LEN;

static BLOCKS: AtomicUsize = AtomicUsize::new(0);
static BYTES: AtomicUsize = AtomicUsize::new(0);
static MAX_BYTES: AtomicUsize = AtomicUsize::new(0);
static TOTAL_BLOCKS: AtomicUsize = AtomicUsize::new(0);

/// Four ASCII bytes naming what a block is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const TX_SEGMENT: Tag = Tag(*b"TXBF");
    pub const FILE_BUFFER: Tag = Tag(*b"FILE");
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Which guard failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    Front,
    Length,
    Back,
}

/// Snapshot of the allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub blocks: usize,
    pub bytes: usize,
    pub max_bytes: usize,
    pub total_blocks: usize,
}

pub fn stats() -> HeapStats {
    HeapStats {
        blocks: BLOCKS.load(Ordering::Relaxed),
        bytes: BYTES.load(Ordering::Relaxed),
        max_bytes: MAX_BYTES.load(Ordering::Relaxed),
        total_blocks: TOTAL_BLOCKS.load(Ordering::Relaxed),
    }
}

/// Fixed-size byte buffer framed by tag guards.
pub struct GuardedBuf {
    tag: Tag,
    raw: Box<[u8]>,
    len: usize,
}

impl GuardedBuf {
    /// Allocates `len` zeroed payload bytes tagged with `tag`.
    pub fn new(tag: Tag, len: usize) -> Self {
        let len_field = len as u32;
        let mut raw = vec![0u8; HEADER_LEN + len + TAG_LEN].into_boxed_slice();
        raw[..TAG_LEN].copy_from_slice(&tag.0);
        raw[TAG_LEN..HEADER_LEN].copy_from_slice(&len_field.to_le_bytes());
        raw[HEADER_LEN + len..].copy_from_slice(&tag.0);

        BLOCKS.fetch_add(1, Ordering::Relaxed);
        TOTAL_BLOCKS.fetch_add(1, Ordering::Relaxed);
        let now = BYTES.fetch_add(len, Ordering::Relaxed) + len;
        MAX_BYTES.fetch_max(now, Ordering::Relaxed);

        Self { tag, raw, len }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.raw[HEADER_LEN..HEADER_LEN + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.raw[HEADER_LEN..HEADER_LEN + self.len]
    }

    /// Checks both guards and the recorded length.
    pub fn verify(&self) -> Result<(), Corruption> {
        if self.raw[..TAG_LEN] != self.tag.0 {
            return Err(Corruption::Front);
        }
        let mut len_bytes = [0u8; LEN_LEN];
        len_bytes.copy_from_slice(&self.raw[TAG_LEN..HEADER_LEN]);
        if u32::from_le_bytes(len_bytes) != self.len as u32 {
            return Err(Corruption::Length);
        }
        if self.raw[HEADER_LEN + self.len..] != self.tag.0 {
            return Err(Corruption::Back);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.raw
    }
}

impl fmt::Debug for GuardedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedBuf")
            .field("tag", &self.tag)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for GuardedBuf {
    fn drop(&mut self) {
        BLOCKS.fetch_sub(1, Ordering::Relaxed);
        BYTES.fetch_sub(self.len, Ordering::Relaxed);

        if let Err(which) = self.verify() {
            tracing::error!(tag = %self.tag, len = self.len, ?which, "heap guard corrupted");
            if cfg!(test) {
                panic!("heap guard corrupted: {which:?} on {}", self.tag);
            }
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_verifies_and_is_zeroed() {
        let buf = GuardedBuf::new(Tag::FILE_BUFFER, 16);
        assert_eq!(buf.len(), 16);
        assert!(buf.as_slice().iter().all(|b| *b == 0));
        assert_eq!(buf.verify(), Ok(()));
    }

    #[test]
    fn payload_writes_do_not_touch_guards() {
        let mut buf = GuardedBuf::new(Tag::TX_SEGMENT, 8);
        buf.as_mut_slice().copy_from_slice(b"abcdefgh");
        assert_eq!(buf.as_slice(), b"abcdefgh");
        assert_eq!(buf.verify(), Ok(()));
    }

    #[test]
    fn detects_trampled_back_guard() {
        let mut buf = GuardedBuf::new(Tag::TX_SEGMENT, 4);
        let end = buf.raw_mut().len() - 1;
        buf.raw_mut()[end] ^= 0xff;
        assert_eq!(buf.verify(), Err(Corruption::Back));
        // restore so drop does not panic
        buf.raw_mut()[end] ^= 0xff;
    }

    #[test]
    fn detects_trampled_front_guard() {
        let mut buf = GuardedBuf::new(Tag::FILE_BUFFER, 4);
        buf.raw_mut()[0] = b'X';
        assert_eq!(buf.verify(), Err(Corruption::Front));
        buf.raw_mut()[0] = b'F';
    }

    #[test]
    #[should_panic(expected = "heap guard corrupted")]
    fn drop_of_corrupted_buffer_is_fatal() {
        let mut buf = GuardedBuf::new(Tag::FILE_BUFFER, 4);
        buf.raw_mut()[5] = 0x7f;
        drop(buf);
    }

    #[test]
    fn counters_track_allocations() {
        let before = stats().total_blocks;
        let buf = GuardedBuf::new(Tag::FILE_BUFFER, 100);
        let during = stats();
        assert!(during.total_blocks > before);
        assert!(during.max_bytes >= 100);
        assert!(during.blocks >= 1);
        drop(buf);
    }
}
