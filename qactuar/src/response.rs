//! Response accumulator and HTTP/1.1 serialization.

use std::time::SystemTime;

use crate::util::BytesList;

/// `Server` header value, stamped with the crate version.
pub const SERVER_IDENT: &str = concat!("Qactuar ", env!("CARGO_PKG_VERSION"));

/// Accumulates an application's response until the pipeline flushes it.
///
/// `status` holds the ASCII bytes of the status portion of the status
/// line, e.g. `b"200"` or `b"101 Switching Protocols"`.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: BytesList,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: b"200".to_vec(),
            headers: Vec::new(),
            body: BytesList::new(),
        }
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status.to_string().into_bytes();
    }

    pub fn add_header(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.headers
            .push((name.as_ref().to_vec(), value.as_ref().to_vec()));
    }

    /// A response is "present" iff it carries any header or body byte.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.body.is_empty()
    }

    pub fn clear(&mut self) {
        self.status = b"200".to_vec();
        self.headers.clear();
        self.body.clear();
    }

    /// Status line plus headers plus the blank line, without the body.
    /// `Date` and `Server` are always prepended.
    pub fn head(&self) -> Vec<u8> {
        let mut out = BytesList::new();
        out.write(&b"HTTP/1.1 "[..]);
        out.write(self.status.clone());
        out.write(&b"\r\n"[..]);
        out.write(format!(
            "Date: {}\r\n",
            httpdate::fmt_http_date(SystemTime::now())
        ));
        out.write(format!("Server: {SERVER_IDENT}\r\n"));
        for (name, value) in &self.headers {
            out.write(name.clone());
            out.write(&b": "[..]);
            out.write(value.clone());
            out.write(&b"\r\n"[..]);
        }
        out.write(&b"\r\n"[..]);
        out.read()
    }

    /// The full wire form: head plus the accumulated body.
    pub fn to_http(&self) -> Vec<u8> {
        let mut out = self.head();
        out.extend_from_slice(&self.body.read());
        out
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}
