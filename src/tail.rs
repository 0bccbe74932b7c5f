use std::collections::VecDeque;

/// Default retained stderr size.
pub const DEFAULT_TAIL_CAPACITY: usize = 4096;

/// Bounded ring of the most recent bytes written by a child process.
///
/// Used only for diagnostics attached to error disconnects; the contents
/// never drive control decisions.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl Default for TailBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_CAPACITY)
    }
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The last `max` bytes, decoded lossily.
    pub fn excerpt(&self, max: usize) -> String {
        let skip = self.buf.len().saturating_sub(max);
        let bytes: Vec<u8> = self.buf.iter().skip(skip).copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
