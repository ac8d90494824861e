//! Incremental HTTP/1.1 request parsing.
//!
//! The pipeline feeds the accumulated raw bytes into [`Request::set_raw`]
//! after every read. The byte stream is split at the first blank line;
//! the prefix is the start-line plus header block, the suffix is the
//! body. A malformed start-line or header line resets the request to
//! empty and not-complete, and the pipeline keeps reading until its
//! timeout.

use percent_encoding::percent_decode;
use uuid::Uuid;

use crate::headers::Headers;

#[derive(Debug, Clone)]
pub struct Request {
    raw: Vec<u8>,
    method: String,
    request_version: String,
    path: String,
    original_path: String,
    raw_path: Vec<u8>,
    query_string: Vec<u8>,
    raw_headers: Vec<(Vec<u8>, Vec<u8>)>,
    headers: Headers,
    body: Vec<u8>,
    request_id: String,
    pub headers_complete: bool,
}

struct Malformed;

impl Request {
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            method: String::new(),
            request_version: String::new(),
            path: String::new(),
            original_path: String::new(),
            raw_path: Vec::new(),
            query_string: Vec::new(),
            raw_headers: Vec::new(),
            headers: Headers::new(),
            body: Vec::new(),
            request_id: Uuid::new_v4().to_string(),
            headers_complete: false,
        }
    }

    /// Replace the raw bytes and re-parse. Malformed input resets every
    /// parsed field; the request id is kept for log correlation.
    pub fn set_raw(&mut self, raw: Vec<u8>) {
        self.raw = raw;
        if self.parse().is_err() {
            self.reset_values();
        }
    }

    fn parse(&mut self) -> Result<(), Malformed> {
        self.reset_values();
        let Some(split) = find_blank_line(&self.raw) else {
            // Header block not finished yet; nothing to parse.
            return Ok(());
        };
        let head = &self.raw[..split];
        let body = &self.raw[split + 4..];

        let mut lines = head.split(|&b| b == b'\n').map(|line| {
            line.strip_suffix(b"\r").unwrap_or(line)
        });
        let start_line = lines.next().ok_or(Malformed)?;
        let mut tokens = start_line.split(|&b| b == b' ');
        let method = tokens.next().ok_or(Malformed)?;
        let target = tokens.next().ok_or(Malformed)?;
        let version = tokens.next().ok_or(Malformed)?;
        if tokens.next().is_some() || method.is_empty() || target.is_empty() || version.is_empty()
        {
            return Err(Malformed);
        }
        let method = std::str::from_utf8(method).map_err(|_| Malformed)?.to_string();
        let version = std::str::from_utf8(version).map_err(|_| Malformed)?.to_string();

        let (path_bytes, query) = match target.iter().position(|&b| b == b'?') {
            Some(idx) => (&target[..idx], target[idx + 1..].to_vec()),
            None => (target, Vec::new()),
        };
        let path = percent_decode(path_bytes).decode_utf8_lossy().into_owned();

        let mut raw_headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let idx = find_subslice(line, b": ").ok_or(Malformed)?;
            let name = line[..idx].to_ascii_lowercase();
            let value = line[idx + 2..].to_vec();
            raw_headers.push((name, value));
        }

        self.method = method;
        self.request_version = version;
        self.original_path = path.clone();
        self.path = path;
        self.raw_path = path_bytes.to_vec();
        self.query_string = query;
        self.headers = Headers::from_raw(&raw_headers);
        self.raw_headers = raw_headers;
        self.body = body.to_vec();
        self.headers_complete = true;
        Ok(())
    }

    fn reset_values(&mut self) {
        self.method.clear();
        self.request_version.clear();
        self.path.clear();
        self.original_path.clear();
        self.raw_path.clear();
        self.query_string.clear();
        self.raw_headers.clear();
        self.headers = Headers::new();
        self.body.clear();
        self.headers_complete = false;
    }

    /// True when nothing has been parsed out of the connection yet.
    pub fn is_empty(&self) -> bool {
        self.method.is_empty()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn request_version(&self) -> &str {
        &self.request_version
    }

    /// Version token without the `HTTP/` prefix, for scopes and logs.
    pub fn request_version_num(&self) -> &str {
        self.request_version
            .strip_prefix("HTTP/")
            .unwrap_or(&self.request_version)
    }

    /// Percent-decoded path, after any route-prefix rewrite.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewrite the scoped path after route matching.
    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Path as originally requested, before route-prefix stripping.
    pub fn original_path(&self) -> &str {
        if self.original_path.is_empty() {
            "/"
        } else {
            &self.original_path
        }
    }

    /// Undecoded path bytes.
    pub fn raw_path(&self) -> &[u8] {
        &self.raw_path
    }

    /// Raw bytes after `?`, or empty.
    pub fn query_string(&self) -> &[u8] {
        &self.query_string
    }

    /// Ordered `(lowercased name, value)` byte pairs.
    pub fn raw_headers(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.raw_headers
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    find_subslice(buf, b"\r\n\r\n")
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
