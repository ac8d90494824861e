//! The application registry backing the CLI, plus a built-in echo app.
//!
//! The registry is the in-process stand-in for a dynamic importer:
//! `"module:symbol"` references from config resolve against a fixed
//! name table populated at build time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use qactuar::asgi::{AppLoader, AsgiApp, AsgiChannel, Event, Scope};
use qactuar::{QactuarError, QactuarResult};

pub struct RegistryLoader {
    apps: HashMap<&'static str, Arc<dyn AsgiApp>>,
    /// Retained for config compatibility; a dynamic loader would prepend
    /// this to its search path.
    #[allow(dead_code)]
    app_dir: Option<PathBuf>,
}

impl RegistryLoader {
    pub fn new(app_dir: Option<PathBuf>) -> Self {
        let mut apps: HashMap<&'static str, Arc<dyn AsgiApp>> = HashMap::new();
        apps.insert("demo:app", Arc::new(EchoApp));
        Self { apps, app_dir }
    }
}

impl AppLoader for RegistryLoader {
    fn load(&self, spec: &str) -> QactuarResult<Arc<dyn AsgiApp>> {
        self.apps.get(spec).map(Arc::clone).ok_or_else(|| {
            let mut known: Vec<&str> = self.apps.keys().copied().collect();
            known.sort_unstable();
            QactuarError::Config(format!(
                "unknown application {spec:?}; registered: {}",
                known.join(", ")
            ))
        })
    }
}

/// Minimal application covering all three scope variants: echoes HTTP
/// request bodies (or greets on empty bodies), echoes WebSocket
/// messages, and acknowledges lifespan events.
struct EchoApp;

#[async_trait]
impl AsgiApp for EchoApp {
    async fn call(&self, scope: Scope, channel: &mut dyn AsgiChannel) -> QactuarResult<()> {
        match scope {
            Scope::Http(scope) => {
                let body = match channel.receive().await? {
                    Event::HttpRequest { body, .. } => body,
                    // The closing drive delivers http.disconnect.
                    _ => return Ok(()),
                };
                let payload = if body.is_empty() {
                    format!("hello from {}\n", scope.path).into_bytes()
                } else {
                    body
                };
                channel
                    .send(Event::HttpResponseStart {
                        status: 200,
                        headers: vec![(
                            b"content-type".to_vec(),
                            b"text/plain; charset=utf-8".to_vec(),
                        )],
                    })
                    .await?;
                channel
                    .send(Event::HttpResponseBody {
                        body: payload,
                        more_body: false,
                    })
                    .await?;
                Ok(())
            }
            Scope::WebSocket(_) => {
                loop {
                    match channel.receive().await? {
                        Event::WebSocketConnect => {
                            channel
                                .send(Event::WebSocketAccept {
                                    subprotocol: None,
                                    headers: Vec::new(),
                                })
                                .await?;
                        }
                        Event::WebSocketReceive { text, bytes } => {
                            channel.send(Event::WebSocketSend { text, bytes }).await?;
                        }
                        Event::WebSocketDisconnect { .. } => return Ok(()),
                        _ => return Ok(()),
                    }
                }
            }
            Scope::Lifespan(_) => {
                match channel.receive().await? {
                    Event::LifespanStartup => {
                        channel.send(Event::LifespanStartupComplete).await?;
                    }
                    Event::LifespanShutdown => {
                        channel.send(Event::LifespanShutdownComplete).await?;
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }
}
