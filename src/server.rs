//! Listener lifecycle: Created, optionally TLS-configured, Serving, Closed.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use tracing::{info, warn};

use crate::api::router;
use crate::error::{HookError, Result};
use crate::interpreter::InterpreterPool;
use crate::{AppState, HookConfig, SharedState};

/// The only protocol advertised over ALPN.
const ALPN_HTTP1: &[u8] = b"http/1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Serving,
    Closed,
}

pub struct HookServer {
    state: SharedState,
    tls: Option<Arc<ServerConfig>>,
    handle: Handle,
    lifecycle: Mutex<Lifecycle>,
}

impl HookServer {
    pub fn new(config: HookConfig, pool: Arc<InterpreterPool>) -> Self {
        if config.secret.is_empty() {
            warn!("Webhook secret is empty; requests without a secret will be accepted");
        }
        Self {
            state: Arc::new(AppState { config, pool }),
            tls: None,
            handle: Handle::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lock()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Loads a PEM certificate chain and private key; only valid before serving.
    pub fn set_tls(&mut self, cert: impl AsRef<Path>, key: impl AsRef<Path>) -> Result<()> {
        let current = self.lifecycle();
        if current != Lifecycle::Created {
            return Err(HookError::InvalidState(format!(
                "TLS can only be configured before serving (server is {:?})",
                current
            )));
        }
        self.tls = Some(Arc::new(load_tls(cert.as_ref(), key.as_ref())?));
        Ok(())
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Binds the configured address and serves until [`HookServer::close`] is called.
    ///
    /// A failed bind closes the server, freeing the pool; it cannot be served again.
    pub async fn serve(&self) -> Result<()> {
        {
            let mut lifecycle = self.lock();
            if *lifecycle != Lifecycle::Created {
                return Err(HookError::InvalidState(format!(
                    "cannot serve from {:?}",
                    *lifecycle
                )));
            }
            *lifecycle = Lifecycle::Serving;
        }

        let (listener, local_addr) = match self.bind() {
            Ok(bound) => bound,
            Err(e) => {
                if let Err(teardown) = self.close() {
                    warn!("Teardown after failed bind: {}", teardown);
                }
                return Err(e);
            }
        };
        info!(
            "Listening on {}{}",
            local_addr,
            if self.tls.is_some() { " (TLS)" } else { "" }
        );
        info!("Running scripts from {:?}", self.state.config.script_root);

        let app =
            router(Arc::clone(&self.state)).into_make_service_with_connect_info::<SocketAddr>();
        match &self.tls {
            Some(tls) => {
                axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(Arc::clone(tls)))
                    .handle(self.handle.clone())
                    .serve(app)
                    .await?
            }
            None => {
                axum_server::from_tcp(listener)
                    .handle(self.handle.clone())
                    .serve(app)
                    .await?
            }
        }
        Ok(())
    }

    /// Address the listener is bound to, once serving has started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.listening().await
    }

    /// Frees the interpreter pool, then stops the listener.
    ///
    /// Scripts still running keep their interpreters; those are torn down when
    /// released. Teardown failures of idle interpreters come back aggregated.
    pub fn close(&self) -> Result<()> {
        {
            let mut lifecycle = self.lock();
            if *lifecycle == Lifecycle::Closed {
                return Ok(());
            }
            *lifecycle = Lifecycle::Closed;
        }

        let failures = self.state.pool.free();
        self.handle.shutdown();
        info!("Server closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HookError::Teardown(failures))
        }
    }

    fn bind(&self) -> Result<(std::net::TcpListener, SocketAddr)> {
        let listener = std::net::TcpListener::bind(&self.state.config.addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        Ok((listener, local_addr))
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_tls(cert: &Path, key: &Path) -> Result<ServerConfig> {
    let tls_err = |path: &Path, e: &dyn std::fmt::Display| {
        HookError::Tls(format!("{}: {}", path.display(), e))
    };

    let mut cert_reader = BufReader::new(File::open(cert).map_err(|e| tls_err(cert, &e))?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_err(cert, &e))?;
    if certs.is_empty() {
        return Err(tls_err(cert, &"no certificates found"));
    }

    let mut key_reader = BufReader::new(File::open(key).map_err(|e| tls_err(key, &e))?);
    let private_key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| tls_err(key, &e))?
        .ok_or_else(|| tls_err(key, &"no private key found"))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HookError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .map_err(|e| HookError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{LuaInterpreter, PoolConfig};
    use std::fs;

    fn server() -> HookServer {
        let pool = InterpreterPool::new(PoolConfig::new("scripts", || {
            Ok(Box::new(LuaInterpreter::new()) as Box<dyn crate::interpreter::Interpreter>)
        }));
        let mut config = HookConfig::new("s1", "scripts");
        config.addr = "127.0.0.1:0".into();
        HookServer::new(config, pool)
    }

    #[test]
    fn missing_tls_files_are_a_configuration_error() {
        let mut server = server();
        let err = server.set_tls("/no/cert.pem", "/no/key.pem").unwrap_err();
        assert!(matches!(err, HookError::Tls(_)));
        assert!(!server.is_tls());
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, "not a certificate\n").unwrap();
        fs::write(&key, "not a key\n").unwrap();

        let err = server().set_tls(&cert, &key).unwrap_err();
        assert!(err.to_string().contains("no certificates found"));
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    #[test]
    fn tls_advertises_only_http1() {
        let mut server = server();
        server.set_tls(fixture("cert.pem"), fixture("key.pem")).unwrap();
        assert!(server.is_tls());

        let tls = server.tls.as_ref().unwrap();
        assert_eq!(tls.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[tokio::test]
    async fn failed_bind_closes_the_server() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = InterpreterPool::new(PoolConfig::new("scripts", || {
            Ok(Box::new(LuaInterpreter::new()) as Box<dyn crate::interpreter::Interpreter>)
        }));
        let mut config = HookConfig::new("s1", "scripts");
        config.addr = taken.local_addr().unwrap().to_string();
        let server = HookServer::new(config, pool);

        let err = server.serve().await.unwrap_err();
        assert!(matches!(err, HookError::IoError(_)));
        assert_eq!(server.lifecycle(), Lifecycle::Closed);
        assert!(server.state().pool.is_closed());
        assert!(matches!(server.serve().await, Err(HookError::InvalidState(_))));
    }

    #[test]
    fn close_is_terminal() {
        let server = server();
        assert_eq!(server.lifecycle(), Lifecycle::Created);
        server.close().unwrap();
        assert_eq!(server.lifecycle(), Lifecycle::Closed);
        assert!(server.state().pool.is_closed());
        server.close().unwrap();
    }

    #[tokio::test]
    async fn serve_after_close_is_rejected() {
        let server = server();
        server.close().unwrap();
        let err = server.serve().await.unwrap_err();
        assert!(matches!(err, HookError::InvalidState(_)));
    }

    #[test]
    fn tls_after_close_is_rejected() {
        let mut server = server();
        server.close().unwrap();
        let err = server.set_tls("cert.pem", "key.pem").unwrap_err();
        assert!(matches!(err, HookError::InvalidState(_)));
    }
}
