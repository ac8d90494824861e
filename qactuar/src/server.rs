//! Server skeleton: listen socket, TLS, application table bootstrap, and
//! the lifespan startup/shutdown drives shared by every execution model.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use crate::asgi::{AppLoader, Scheme};
use crate::config::Config;
use crate::error::{QactuarError, QactuarResult};
use crate::handlers::LifespanHandler;
use crate::router::AppTable;
use crate::{sys, tls};

pub struct Server {
    pub config: Arc<Config>,
    pub listener: std::net::TcpListener,
    pub tls: Option<TlsAcceptor>,
    pub scheme: Scheme,
    pub server_name: String,
    pub apps: Arc<AppTable>,
    pub shutting_down: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listen socket, build the TLS acceptor when configured,
    /// and resolve every configured application through the loader.
    pub fn new(config: Config, loader: &dyn AppLoader) -> QactuarResult<Self> {
        let listener = sys::create_listen_socket(&config.host, config.port)?;

        let (tls, scheme) = if config.tls_configured() {
            (Some(tls::build_acceptor(&config)?), Scheme::Https)
        } else {
            (None, Scheme::Http)
        };

        let mut apps = AppTable::new();
        for (route, spec) in &config.apps {
            apps.register(route.clone(), loader.load(spec)?);
        }
        if apps.is_empty() {
            error!(
                target: "qactuar::server",
                "No apps found; register at least one application"
            );
            return Err(QactuarError::Config(
                "no applications registered".to_string(),
            ));
        }

        Ok(Self {
            config: Arc::new(config),
            listener,
            tls,
            scheme,
            server_name: sys::hostname(),
            apps: Arc::new(apps),
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The port actually bound, which differs from the configured port
    /// when it was 0.
    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.config.port)
    }

    pub fn server_info(&self) -> (String, u16) {
        (self.server_name.clone(), self.port())
    }

    /// Flip the shutting-down flag on Ctrl-C; the accept loops observe it
    /// on their next poll tick.
    pub fn install_signal_handler(&self) -> QactuarResult<()> {
        let flag = Arc::clone(&self.shutting_down);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Release);
        })
        .map_err(|err| QactuarError::Config(format!("cannot install signal handler: {err}")))
    }

    /// Drive lifespan startup against every registered application, once
    /// each, then announce the listening address.
    pub fn start_up(&self) -> QactuarResult<()> {
        lifespan_runtime()?.block_on(self.send_to_all_apps());
        info!(
            target: "qactuar::server",
            "Qactuar: Serving {} on {}:{}",
            self.scheme.as_str().to_ascii_uppercase(),
            self.config.host,
            self.port(),
        );
        Ok(())
    }

    /// Drive lifespan shutdown against every application and exit.
    pub fn shut_down(&self) -> ! {
        self.shutting_down.store(true, Ordering::Release);
        info!(target: "qactuar::server", "Shutting down");
        match lifespan_runtime() {
            Ok(runtime) => runtime.block_on(self.send_to_all_apps()),
            Err(err) => error!(target: "qactuar::server", "lifespan shutdown skipped: {err}"),
        }
        std::process::exit(0);
    }

    /// Variant of [`shut_down`](Self::shut_down) for callers already
    /// inside a runtime.
    pub async fn shut_down_async(&self) -> ! {
        self.shutting_down.store(true, Ordering::Release);
        info!(target: "qactuar::server", "Shutting down");
        self.send_to_all_apps().await;
        std::process::exit(0);
    }

    async fn send_to_all_apps(&self) {
        for (route, app) in self.apps.iter() {
            let mut handler = LifespanHandler::new(Arc::clone(&self.shutting_down));
            if let Err(err) = app
                .call(LifespanHandler::create_scope(), &mut handler)
                .await
            {
                // One failing app must not block the others.
                error!(
                    target: "qactuar::server",
                    "lifespan drive failed for {route}: {err}"
                );
            }
        }
    }
}

fn lifespan_runtime() -> QactuarResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(QactuarError::from)
}
