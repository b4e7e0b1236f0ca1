//! Replication backlog: a fixed-size ring buffer over the AOF byte stream.
//!
//! The backlog holds the most recent window of the replication stream,
//! addressed by global byte offsets. `start` is the global offset of the
//! oldest byte still resident, `end` is one past the newest, and `idx` is
//! the physical write position inside the ring. A replica that presents an
//! offset inside `[start, end)` can be served a partial resynchronization
//! instead of a full AOF transfer.

/// Default backlog window: 1 MiB, matching Redis.
pub const DEFAULT_BACKLOG_SIZE: i64 = 1 << 20;

/// Fixed-size ring buffer of raw replication stream bytes.
#[derive(Debug)]
pub struct Backlog {
    buf: Vec<u8>,
    size: i64,

    /// Global offset of the oldest resident byte.
    start: i64,
    /// Global offset one past the newest resident byte.
    end: i64,
    /// Physical ring index of the next write.
    idx: i64,
}

impl Backlog {
    /// Creates a backlog of `size` bytes whose window begins at
    /// `start_offset` in the global stream.
    pub fn new(size: i64, start_offset: i64) -> Self {
        assert!(size > 0, "backlog size must be positive");
        Self {
            buf: vec![0; size as usize],
            size,
            start: start_offset,
            end: start_offset,
            idx: 0,
        }
    }

    /// Appends raw stream bytes, advancing `end` and evicting the oldest
    /// bytes once the window is full.
    pub fn append(&mut self, data: &[u8]) {
        for &b in data {
            self.buf[self.idx as usize] = b;
            self.idx = (self.idx + 1) % self.size;

            if self.end - self.start >= self.size {
                self.start += 1;
            }
            self.end += 1;
        }
    }

    /// Returns `true` if the backlog still holds the byte at `offset`.
    pub fn can_serve(&self, offset: i64) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Returns the stream bytes from `offset` (inclusive) to the end of
    /// the window, or `None` when the offset is outside the window.
    ///
    /// `idx` points one past the physical position of `end - 1`, so the
    /// physical position of `offset` is
    /// `(idx - (end - offset) + size) % size`.
    pub fn read_from(&self, offset: i64) -> Option<Vec<u8>> {
        if !self.can_serve(offset) {
            return None;
        }

        let len = self.end - offset;
        let start_idx = (self.idx - (self.end - offset) + self.size) % self.size;

        let mut data = Vec::with_capacity(len as usize);
        for i in 0..len {
            let pos = (start_idx + i) % self.size;
            data.push(self.buf[pos as usize]);
        }
        Some(data)
    }

    /// Global offset of the oldest resident byte.
    pub fn start_offset(&self) -> i64 {
        self.start
    }

    /// Global offset one past the newest resident byte.
    pub fn end_offset(&self) -> i64 {
        self.end
    }
}
