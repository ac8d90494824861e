//! TLS collaborator: builds the acceptor from the configured PEM cert
//! and key, honoring the cipher list where it maps onto the provider's
//! suites.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use tokio_rustls::TlsAcceptor;
use tracing::warn;

use crate::config::Config;
use crate::error::{QactuarError, QactuarResult};

/// Build the TLS acceptor from the config's cert/key paths.
pub fn build_acceptor(config: &Config) -> QactuarResult<TlsAcceptor> {
    let cert_path = config
        .ssl_cert_path
        .as_deref()
        .ok_or_else(|| QactuarError::Config("SSL_CERT_PATH is not set".to_string()))?;
    let key_path = config
        .ssl_key_path
        .as_deref()
        .ok_or_else(|| QactuarError::Config("SSL_KEY_PATH is not set".to_string()))?;

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    let provider = select_provider(&config.ssl_ciphers);

    let server_config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|err| QactuarError::Tls(err.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| QactuarError::Tls(err.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> QactuarResult<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| QactuarError::Tls(format!("bad certificate {}: {err}", path.display())))?;
    if certs.is_empty() {
        return Err(QactuarError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> QactuarResult<rustls::pki_types::PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| QactuarError::Tls(format!("bad private key {}: {err}", path.display())))?
        .ok_or_else(|| {
            QactuarError::Tls(format!("no private key found in {}", path.display()))
        })
}

/// Narrow the provider's cipher suites to those matching the configured
/// OpenSSL-style cipher list. Each `:`-separated token is split into its
/// name segments (`ECDHE-RSA-AES256-GCM-SHA384` becomes `ECDHE`, `RSA`,
/// `AES`, `256`, `GCM`, `SHA384`); a suite matches a token when its name
/// carries every segment. No match keeps the defaults.
fn select_provider(ciphers: &str) -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    if ciphers.is_empty() {
        return provider;
    }
    let tokens: Vec<Vec<String>> = ciphers
        .split(':')
        .map(cipher_token_segments)
        .filter(|segments| !segments.is_empty())
        .collect();
    let selected: Vec<_> = provider
        .cipher_suites
        .iter()
        .copied()
        .filter(|suite| {
            let name = format!("{:?}", suite.suite());
            tokens.iter().any(|segments| {
                segments.iter().all(|segment| name.contains(segment.as_str()))
            })
        })
        .collect();
    if selected.is_empty() {
        warn!(
            target: "qactuar::server",
            "no cipher suites matched {ciphers:?}; using provider defaults"
        );
    } else {
        provider.cipher_suites = selected;
    }
    provider
}

fn cipher_token_segments(token: &str) -> Vec<String> {
    let normalized = token
        .trim()
        .replace('-', "_")
        .to_ascii_uppercase()
        .replace("AES128", "AES_128")
        .replace("AES256", "AES_256");
    normalized
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// A handshake failure carrying a TLS alert is treated as benign: the
/// peer told us why it went away, and there is no response to write.
pub fn is_benign_handshake_error(err: &std::io::Error) -> bool {
    err.to_string().to_ascii_lowercase().contains("alert")
}
