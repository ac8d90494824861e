//! Small byte-buffer helpers shared by the parser, the response
//! accumulator and the WebSocket codec.

/// Append-only byte buffer that stores chunks as received and joins them
/// exactly once on [`read`](BytesList::read).
#[derive(Debug, Default, Clone)]
pub struct BytesList {
    chunks: Vec<Vec<u8>>,
    len: usize,
}

impl BytesList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk. Empty chunks are dropped.
    pub fn write(&mut self, chunk: impl Into<Vec<u8>>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    /// Append several chunks in order.
    pub fn writelines<I, C>(&mut self, chunks: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        for chunk in chunks {
            self.write(chunk);
        }
    }

    /// Join every chunk into one contiguous byte vector.
    pub fn read(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Total byte count across all chunks.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_preserves_order() {
        let mut buf = BytesList::new();
        buf.write(&b"GET / "[..]);
        buf.write(&b"HTTP/1.1"[..]);
        assert_eq!(buf.read(), b"GET / HTTP/1.1");
        assert_eq!(buf.len(), 14);
    }

    #[test]
    fn writelines_and_clear() {
        let mut buf = BytesList::new();
        buf.writelines([&b"a"[..], &b""[..], &b"bc"[..]]);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.read(), b"abc");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.read(), b"");
    }
}
