// web-server/src/server.rs
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use actix_web::{dev::ServerHandle, web, App, HttpServer};
use common::models::session::SessionInfo;
use common::{Config, ProtectedKeyStore, SharedSecret, ShellError};
use tokio::task::JoinHandle;

use crate::api;
use crate::api::bridge::AskCounter;
use crate::middleware::{AuthPolicy, RequestAuthGuard};
use crate::tls;

/// Loopback HTTPS server with the auth guard in front of every route
pub struct LoopbackServer;

impl LoopbackServer {
    /// Consume the key store, bind the TLS listener and start serving.
    ///
    /// Must be called from inside a Tokio runtime. The server's own signal
    /// handling is disabled; the caller owns shutdown.
    pub fn start(
        config: &Config,
        key_store: ProtectedKeyStore,
        secret: SharedSecret,
        session: SessionInfo,
    ) -> Result<RunningServer, ShellError> {
        let policy = AuthPolicy::from_config(&config.auth)?;
        let tls_config = tls::server_config(key_store.consume()?)?;

        let guard = RequestAuthGuard::new(secret, policy);
        let session_data = web::Data::new(session);
        let counter_data = web::Data::new(AskCounter::default());

        let bind_addr = format!("{}:{}", config.server.bind_addr, config.server.port);
        tracing::info!("Binding loopback server on {}", bind_addr);

        let server = HttpServer::new(move || {
            App::new()
                .wrap(guard.clone())
                .app_data(session_data.clone())
                .app_data(counter_data.clone())
                .configure(api::configure)
        })
        .workers(config.server.workers.max(1))
        .shutdown_timeout(config.server.shutdown_timeout)
        .disable_signals()
        .bind_rustls_021(bind_addr.as_str(), tls_config)
        .map_err(|e| ShellError::BindFailure {
            addr: bind_addr.clone(),
            reason: e.to_string(),
        })?;

        let local_addr = server
            .addrs()
            .first()
            .copied()
            .ok_or_else(|| ShellError::BindFailure {
                addr: bind_addr.clone(),
                reason: "no listening address".to_string(),
            })?;

        let server = server.run();
        let handle = server.handle();
        let task = tokio::spawn(server);

        tracing::info!("Loopback server listening on https://{}:{}", config.server.hostname, local_addr.port());

        Ok(RunningServer {
            local_addr,
            handle,
            task: Mutex::new(Some(task)),
            stopped: AtomicBool::new(false),
        })
    }
}

/// Handle to a started server
pub struct RunningServer {
    local_addr: SocketAddr,
    handle: ServerHandle,
    task: Mutex<Option<JoinHandle<io::Result<()>>>>,
    stopped: AtomicBool,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting, drain workers and release the listening socket.
    /// Later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Loopback server already stopping");
            return;
        }

        tracing::info!("Stopping loopback server on {}", self.local_addr);
        self.handle.stop(true).await;

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            match task.await {
                Ok(Ok(())) => tracing::info!("Loopback server stopped"),
                Ok(Err(e)) => tracing::warn!("Loopback server exited with error: {}", e),
                Err(e) => tracing::warn!("Loopback server task failed: {}", e),
            }
        }
    }
}
