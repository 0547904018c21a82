//! Fixed-capacity ring buffer with tail-keep semantics: retains only the
//! last N bytes written to a stream, with a `truncated` flag. A standalone,
//! thread-safe sink so [`crate::exec::run_one`] can feed it incrementally
//! from an async read loop instead of buffering the whole stream first.

use std::sync::Mutex;

/// Minimum allowed capacity for a capped writer.
pub const MIN_OUTPUT_BYTES: usize = 1024;
/// Maximum allowed capacity for a capped writer, per stream.
pub const HARD_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;
/// Default capacity when the caller doesn't specify one.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// Clamp a requested output capacity into `[MIN_OUTPUT_BYTES,
/// HARD_MAX_OUTPUT_BYTES]`, treating `0` as "use the default".
pub fn clamp_capacity(requested: i64) -> usize {
    if requested <= 0 {
        return DEFAULT_MAX_OUTPUT_BYTES;
    }
    let requested = requested.min(HARD_MAX_OUTPUT_BYTES as i64).max(0) as usize;
    requested.clamp(MIN_OUTPUT_BYTES, HARD_MAX_OUTPUT_BYTES)
}

struct RingState {
    buf: Vec<u8>,
    /// Index in `buf` one past the most recently written byte (mod `buf.len()`
    /// once the ring has wrapped).
    head: usize,
    /// Number of valid bytes currently stored (<= buf.len()).
    len: usize,
    truncated: bool,
    total_bytes: u64,
}

/// Thread-safe capped ring-buffer writer. Clone the `Arc` to share between
/// the spawning task and the stdout/stderr pump tasks.
pub struct CappedWriter {
    cap: usize,
    state: Mutex<RingState>,
}

impl CappedWriter {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.clamp(MIN_OUTPUT_BYTES, HARD_MAX_OUTPUT_BYTES);
        Self {
            cap,
            state: Mutex::new(RingState {
                buf: Vec::with_capacity(cap),
                head: 0,
                len: 0,
                truncated: false,
                total_bytes: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Append bytes, evicting the oldest bytes once capacity is exceeded.
    pub fn write(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let mut state = self.state.lock().expect("capped writer mutex poisoned");
        state.total_bytes += chunk.len() as u64;

        if chunk.len() >= self.cap {
            // The tail of `chunk` alone already fills (or exceeds) capacity:
            // replace the buffer outright with exactly the last `cap` bytes.
            let start = chunk.len() - self.cap;
            state.buf.clear();
            state.buf.extend_from_slice(&chunk[start..]);
            state.head = 0;
            state.len = self.cap;
            state.truncated = true;
            return;
        }

        if state.buf.len() < self.cap {
            state.buf.resize(self.cap, 0);
        }

        let overflow = (state.len + chunk.len()).saturating_sub(self.cap);
        if overflow > 0 {
            state.truncated = true;
        }

        for &byte in chunk {
            state.buf[state.head] = byte;
            state.head = (state.head + 1) % self.cap;
        }
        state.len = (state.len + chunk.len()).min(self.cap);
    }

    /// Copy out the currently retained bytes, oldest-to-newest, unwrapping
    /// the ring as needed.
    pub fn snapshot(&self) -> (Vec<u8>, bool) {
        let state = self.state.lock().expect("capped writer mutex poisoned");
        if state.len == 0 {
            return (Vec::new(), state.truncated);
        }
        let mut out = Vec::with_capacity(state.len);
        if state.len < self.cap {
            // Ring never wrapped: valid bytes are buf[0..len].
            out.extend_from_slice(&state.buf[..state.len]);
        } else {
            // Ring wrapped: oldest byte is at `head` (the next write slot).
            out.extend_from_slice(&state.buf[state.head..]);
            out.extend_from_slice(&state.buf[..state.head]);
        }
        (out, state.truncated)
    }

    /// UTF-8-safe snapshot for JSON serialization: invalid sequences are
    /// replaced with U+FFFD.
    pub fn snapshot_utf8(&self) -> (String, bool) {
        let (bytes, truncated) = self.snapshot();
        (String::from_utf8_lossy(&bytes).into_owned(), truncated)
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().expect("capped writer mutex poisoned").total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_capacity_default_on_zero() {
        assert_eq!(clamp_capacity(0), DEFAULT_MAX_OUTPUT_BYTES);
    }

    #[test]
    fn clamp_capacity_clamps_below_min() {
        assert_eq!(clamp_capacity(1), MIN_OUTPUT_BYTES);
    }

    #[test]
    fn clamp_capacity_clamps_above_hard_max() {
        assert_eq!(clamp_capacity(i64::MAX), HARD_MAX_OUTPUT_BYTES);
    }

    #[test]
    fn snapshot_of_short_write_is_not_truncated() {
        let w = CappedWriter::new(MIN_OUTPUT_BYTES);
        w.write(b"hello");
        let (bytes, truncated) = w.snapshot();
        assert_eq!(bytes, b"hello");
        assert!(!truncated);
    }

    #[test]
    fn snapshot_equals_suffix_when_overflowing() {
        let w = CappedWriter::new(8);
        w.write(b"0123456789"); // 10 bytes into an 8-byte ring
        let (bytes, truncated) = w.snapshot();
        assert_eq!(bytes, b"23456789");
        assert!(truncated);
    }

    #[test]
    fn snapshot_equals_suffix_across_multiple_writes() {
        let w = CappedWriter::new(8);
        w.write(b"abcd");
        w.write(b"efghij"); // total "abcdefghij", keep last 8: "cdefghij"
        let (bytes, truncated) = w.snapshot();
        assert_eq!(bytes, b"cdefghij");
        assert!(truncated);
    }

    #[test]
    fn snapshot_length_is_min_of_total_and_capacity() {
        let w = CappedWriter::new(16);
        w.write(&[1u8; 5]);
        assert_eq!(w.snapshot().0.len(), 5);
        w.write(&[2u8; 20]);
        assert_eq!(w.snapshot().0.len(), 16);
    }

    #[test]
    fn single_write_larger_than_capacity_keeps_exact_tail() {
        let w = CappedWriter::new(4);
        w.write(b"abcdefgh");
        let (bytes, truncated) = w.snapshot();
        assert_eq!(bytes, b"efgh");
        assert!(truncated);
    }

    #[test]
    fn invalid_utf8_is_replaced_with_replacement_char() {
        let w = CappedWriter::new(MIN_OUTPUT_BYTES);
        w.write(&[0x68, 0x69, 0xFF, 0xFE]);
        let (s, _) = w.snapshot_utf8();
        assert!(s.starts_with("hi"));
        assert!(s.contains('\u{FFFD}'));
    }

    #[test]
    fn total_bytes_is_monotonic_even_after_truncation() {
        let w = CappedWriter::new(4);
        w.write(b"abcdefgh");
        w.write(b"ij");
        assert_eq!(w.total_bytes(), 10);
    }
}
