//! HTTP handler: maps `http.*` events onto the request/response state.
//!
//! The request body arrives in a single `http.request` message; repeated
//! receives after delivery (and every receive once the connection is
//! closing) yield `http.disconnect`. Response bodies are accumulated and
//! flushed once, unless the application sets `more_body`, in which case
//! the head is flushed with `Transfer-Encoding: chunked` and each body
//! message becomes a chunk.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::asgi::{AsgiChannel, Event, HttpScope, Scheme, Scope};
use crate::error::{QactuarError, QactuarResult};
use crate::request::Request;
use crate::response::Response;

pub struct HttpHandler<'a, S> {
    stream: &'a mut S,
    request: &'a Request,
    response: &'a mut Response,
    /// Set once the chunked head has been flushed; the pipeline skips its
    /// own flush when this is set.
    streamed: &'a mut bool,
    closing: bool,
    delivered: bool,
}

impl<'a, S> HttpHandler<'a, S> {
    pub fn new(
        stream: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
        streamed: &'a mut bool,
        closing: bool,
    ) -> Self {
        Self {
            stream,
            request,
            response,
            streamed,
            closing,
            delivered: false,
        }
    }

    pub fn create_scope(
        request: &Request,
        scheme: Scheme,
        client: (String, u16),
        server: (String, u16),
    ) -> Scope {
        Scope::Http(HttpScope {
            http_version: request.request_version_num().to_string(),
            method: request.method().to_string(),
            scheme,
            path: request.path().to_string(),
            raw_path: request.raw_path().to_vec(),
            query_string: request.query_string().to_vec(),
            root_path: String::new(),
            headers: request.raw_headers().to_vec(),
            client,
            server,
        })
    }
}

impl<S: AsyncWrite + Unpin + Send> HttpHandler<'_, S> {
    async fn write_chunk(&mut self, body: &[u8]) -> QactuarResult<()> {
        if body.is_empty() {
            return Ok(());
        }
        let mut chunk = format!("{:x}\r\n", body.len()).into_bytes();
        chunk.extend_from_slice(body);
        chunk.extend_from_slice(b"\r\n");
        self.stream
            .write_all(&chunk)
            .await
            .map_err(QactuarError::Socket)?;
        self.stream.flush().await.map_err(QactuarError::Socket)?;
        Ok(())
    }

    async fn finish_chunks(&mut self) -> QactuarResult<()> {
        self.stream
            .write_all(b"0\r\n\r\n")
            .await
            .map_err(QactuarError::Socket)?;
        self.stream.flush().await.map_err(QactuarError::Socket)?;
        Ok(())
    }
}

#[async_trait]
impl<S: AsyncWrite + Unpin + Send> AsgiChannel for HttpHandler<'_, S> {
    async fn receive(&mut self) -> QactuarResult<Event> {
        if self.closing || self.delivered {
            return Ok(Event::HttpDisconnect);
        }
        self.delivered = true;
        Ok(Event::HttpRequest {
            body: self.request.body().to_vec(),
            more_body: false,
        })
    }

    async fn send(&mut self, event: Event) -> QactuarResult<()> {
        match event {
            Event::HttpResponseStart { status, headers } => {
                self.response.set_status(status);
                self.response.headers.extend(headers);
                Ok(())
            }
            Event::HttpResponseBody { body, more_body } => {
                if *self.streamed {
                    self.write_chunk(&body).await?;
                    if !more_body {
                        self.finish_chunks().await?;
                    }
                } else if more_body {
                    self.response.add_header("transfer-encoding", "chunked");
                    self.response
                        .add_header("x-request-id", self.request.request_id());
                    let head = self.response.head();
                    self.stream
                        .write_all(&head)
                        .await
                        .map_err(QactuarError::Socket)?;
                    *self.streamed = true;
                    self.write_chunk(&body).await?;
                } else {
                    self.response.body.write(body);
                }
                Ok(())
            }
            other => Err(QactuarError::Application(format!(
                "unexpected {} on the http channel",
                other.kind()
            ))),
        }
    }
}
