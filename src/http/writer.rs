use std::collections::VecDeque;
use std::io::{self, Write};

use crate::error::ContentError;
use crate::heap::{GuardedBuf, Tag};
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes status line, headers and any inline body.
pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::new();

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

/// One fixed-capacity transmit buffer.
#[derive(Debug)]
struct Segment {
    buf: GuardedBuf,
    filled: usize,
    sent: usize,
}

impl Segment {
    fn new(capacity: usize) -> Self {
        Self {
            buf: GuardedBuf::new(Tag::TX_SEGMENT, capacity),
            filled: 0,
            sent: 0,
        }
    }

    fn space(&self) -> usize {
        self.buf.len() - self.filled
    }

    fn append(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.space());
        self.buf.as_mut_slice()[self.filled..self.filled + n].copy_from_slice(&data[..n]);
        self.filled += n;
        n
    }

    fn unsent(&self) -> &[u8] {
        &self.buf.as_slice()[self.sent..self.filled]
    }
}

/// Result of pushing the chain at a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Every segment went out and was released.
    Complete,
    /// The socket would block; the unsent remainder is kept.
    Pending,
}

/// Chained output segments for one session.
///
/// Generated text is appended at the tail; the response head is prepended
/// once the body length is known. Segments are released as soon as they
/// are fully written.
#[derive(Debug)]
pub struct OutputChain {
    segments: VecDeque<Segment>,
    segment_size: usize,
    limit: usize,
    body_len: usize,
}

impl OutputChain {
    pub fn new(segment_size: usize, limit: usize) -> Self {
        Self {
            segments: VecDeque::new(),
            segment_size: segment_size.max(1),
            limit,
            body_len: 0,
        }
    }

    /// Appends body bytes, growing the chain a segment at a time.
    pub fn push(&mut self, mut data: &[u8]) -> Result<(), ContentError> {
        if self.body_len + data.len() > self.limit {
            return Err(ContentError::OutputFull(self.limit));
        }
        self.body_len += data.len();

        while !data.is_empty() {
            if self.segments.back().is_none_or(|s| s.space() == 0) {
                self.segments.push_back(Segment::new(self.segment_size));
            }
            // just ensured a tail with room
            if let Some(tail) = self.segments.back_mut() {
                let n = tail.append(data);
                data = &data[n..];
            }
        }
        Ok(())
    }

    /// Places `head` in front of everything queued so far.
    pub fn prepend(&mut self, head: &[u8]) {
        if head.is_empty() {
            return;
        }
        let mut segment = Segment::new(head.len());
        segment.append(head);
        self.segments.push_front(segment);
    }

    /// Number of body bytes appended since the last reset.
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Bytes still waiting to be written.
    pub fn pending_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.filled - s.sent).sum()
    }

    /// Releases every segment and resets the body length.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.body_len = 0;
    }

    /// Writes segments in order until the chain drains or the writer would
    /// block.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<Flush> {
        while let Some(front) = self.segments.front_mut() {
            if front.unsent().is_empty() {
                self.segments.pop_front();
                continue;
            }
            match writer.write(front.unsent()) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => front.sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.body_len = 0;
        Ok(Flush::Complete)
    }
}
