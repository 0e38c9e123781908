// desktop-shell/src/bootstrap.rs
// Startup and teardown ordering for one shell session.
//
// Identity and secret come first, then the loopback server, then the
// engine with the pinner and credentials installed before its first
// navigation. Teardown runs in reverse and leaves the port free.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use common::models::session::SessionInfo;
use common::token::{generate_key_store_passphrase, generate_secure_token};
use common::{CertificateAuthority, Config, SharedSecret, ShellError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use url::Url;
use web_server::{LoopbackServer, RunningServer};

use crate::engine::{BrowserEngine, EngineEvent, RequestCredentials};
use crate::pinning::TrustPinner;
use crate::shutdown::{ShutdownHandle, ShutdownReason};

const LANDING_PATH: &str = "/landing";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    IdentityReady,
    ServerStarting,
    ServerReady,
    EngineLaunching,
    Running,
    ShuttingDown,
    Stopped,
}

impl BootstrapState {
    fn can_advance_to(self, next: BootstrapState) -> bool {
        use BootstrapState::*;
        match (self, next) {
            (Idle, IdentityReady)
            | (IdentityReady, ServerStarting)
            | (ServerStarting, ServerReady)
            | (ServerReady, EngineLaunching)
            | (EngineLaunching, Running)
            | (Running, ShuttingDown)
            | (ShuttingDown, Stopped) => true,
            // A failed startup step aborts straight to Stopped
            (Idle | IdentityReady | ServerStarting | ServerReady | EngineLaunching, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Current state plus every state entered so far
#[derive(Clone)]
struct StateTracker {
    current: Arc<watch::Sender<BootstrapState>>,
    history: Arc<Mutex<Vec<BootstrapState>>>,
}

impl StateTracker {
    fn new() -> Self {
        let (tx, _) = watch::channel(BootstrapState::Idle);
        Self {
            current: Arc::new(tx),
            history: Arc::new(Mutex::new(vec![BootstrapState::Idle])),
        }
    }

    fn current(&self) -> BootstrapState {
        *self.current.borrow()
    }

    fn history(&self) -> Vec<BootstrapState> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn advance(&self, next: BootstrapState) -> Result<(), ShellError> {
        let mut from = next;
        let moved = self.current.send_if_modified(|state| {
            from = *state;
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if !moved {
            return Err(ShellError::InvalidState {
                from: from.to_string(),
                to: next.to_string(),
            });
        }
        if let Ok(mut history) = self.history.lock() {
            history.push(next);
        }
        tracing::debug!("Session state {} -> {}", from, next);
        Ok(())
    }

    async fn wait_for(&self, target: BootstrapState) {
        let mut rx = self.current.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }
}

/// Drives one session from `Idle` to `Running`
pub struct SessionBootstrap {
    config: Config,
    state: StateTracker,
    shutdown: ShutdownHandle,
}

impl SessionBootstrap {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: StateTracker::new(),
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state.current()
    }

    /// Available before `start` so a signal during startup is not lost
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Bring the session up. On failure everything started so far is torn
    /// down, the state ends at `Stopped` and the error is returned.
    pub async fn start<E: BrowserEngine>(self, mut engine: E) -> Result<RunningSession<E>, ShellError> {
        let mut server: Option<RunningServer> = None;

        match self.bring_up(&mut engine, &mut server).await {
            Ok(ready) => Ok(RunningSession {
                config: self.config,
                secret: ready.secret,
                fingerprint: ready.fingerprint,
                landing_url: ready.landing_url,
                pinner: ready.pinner,
                server: ready.server,
                engine,
                events: ready.events,
                state: self.state,
                shutdown: self.shutdown,
                teardown_started: AtomicBool::new(false),
            }),
            Err(e) => {
                tracing::error!("Session startup failed in state {}: {}", self.state.current(), e);
                engine.terminate();
                if let Some(server) = server {
                    server.stop().await;
                }
                if let Err(state_err) = self.state.advance(BootstrapState::Stopped) {
                    tracing::debug!("{}", state_err);
                }
                Err(e)
            }
        }
    }

    async fn bring_up<E: BrowserEngine>(
        &self,
        engine: &mut E,
        server_slot: &mut Option<RunningServer>,
    ) -> Result<Ready, ShellError> {
        let config = &self.config;
        config.validate()?;

        // A fresh identity and secret every run; neither outlives the process
        let authority = CertificateAuthority::new(&config.identity);
        let identity = authority.generate(&config.server.hostname)?;
        let fingerprint = identity.fingerprint().to_string();
        let secret = SharedSecret::new(generate_secure_token(config.auth.token_bytes));

        tracing::info!("Generated loopback certificate, SHA-256 fingerprint {}", fingerprint);
        tracing::info!("Public key SHA-256 fingerprint {}", identity.public_key_fingerprint());
        if config.dev_mode {
            tracing::warn!("[development mode] shared secret: {}", secret.expose());
        } else {
            tracing::debug!("Shared secret generated");
        }
        self.state.advance(BootstrapState::IdentityReady)?;

        self.state.advance(BootstrapState::ServerStarting)?;
        let passphrase = generate_key_store_passphrase(config.auth.token_bytes);
        let key_store = CertificateAuthority::to_protected_key_store(&identity, &passphrase)?;
        let session_info = SessionInfo::new(
            fingerprint.clone(),
            identity.public_key_fingerprint().to_string(),
            config.auth.mode,
            config.dev_mode,
        );
        tracing::info!(session_id = %session_info.session_id, "Starting loopback server");
        let server = LoopbackServer::start(config, key_store, secret.clone(), session_info)?;
        let server_addr = server.local_addr();
        *server_slot = Some(server);
        self.state.advance(BootstrapState::ServerReady)?;

        self.state.advance(BootstrapState::EngineLaunching)?;
        let pinner = TrustPinner::for_identity(&identity);
        drop(identity);

        engine.install_trust_pinner(pinner.clone());
        if config.auth.mode.accepts_header() {
            engine.install_request_credentials(RequestCredentials {
                host: config.server.hostname.clone(),
                header_name: config.auth.header_name.clone(),
                secret: secret.clone(),
            });
        }
        engine.launch(server_addr)?;
        let events = engine.take_events();

        let landing_url = landing_url(config, server_addr.port(), &secret)?;
        let landing = engine.navigate(landing_url.clone()).await?;
        if landing.status != 200 {
            return Err(ShellError::Engine(format!(
                "initial navigation to {} returned {}",
                LANDING_PATH, landing.status
            )));
        }
        tracing::info!("Engine loaded https://{}:{}{}", config.server.hostname, server_addr.port(), LANDING_PATH);

        let server = server_slot
            .take()
            .ok_or_else(|| ShellError::Engine("server handle lost during startup".to_string()))?;
        self.state.advance(BootstrapState::Running)?;

        Ok(Ready {
            secret,
            fingerprint,
            landing_url,
            pinner,
            server,
            events,
        })
    }
}

struct Ready {
    secret: SharedSecret,
    fingerprint: String,
    landing_url: Url,
    pinner: TrustPinner,
    server: RunningServer,
    events: Option<UnboundedReceiver<EngineEvent>>,
}

/// The query-cookie modes carry the secret on the first navigation only
fn landing_url(config: &Config, port: u16, secret: &SharedSecret) -> Result<Url, ShellError> {
    let mut url = Url::parse(&format!("https://{}:{}{}", config.server.hostname, port, LANDING_PATH))
        .map_err(|e| ShellError::Config(format!("invalid landing URL: {}", e)))?;
    if config.auth.mode.accepts_query_and_cookie() {
        url.query_pairs_mut()
            .append_pair(&config.auth.query_param, secret.expose());
    }
    Ok(url)
}

/// A session in `Running` until shut down
pub struct RunningSession<E: BrowserEngine> {
    config: Config,
    secret: SharedSecret,
    fingerprint: String,
    landing_url: Url,
    pinner: TrustPinner,
    server: RunningServer,
    engine: E,
    events: Option<UnboundedReceiver<EngineEvent>>,
    state: StateTracker,
    shutdown: ShutdownHandle,
    teardown_started: AtomicBool,
}

impl<E: BrowserEngine> RunningSession<E> {
    pub fn state(&self) -> BootstrapState {
        self.state.current()
    }

    /// Every state entered since `Idle`, in order
    pub fn state_history(&self) -> Vec<BootstrapState> {
        self.state.history()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// In the query-cookie modes this URL contains the secret
    pub fn landing_url(&self) -> &Url {
        &self.landing_url
    }

    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The pinner installed in the engine, carrying only the public certificate
    pub fn trust_pinner(&self) -> &TrustPinner {
        &self.pinner
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Terminate the engine, stop the server and release the port.
    /// Concurrent and repeated calls wait for the same teardown.
    pub async fn shutdown(&self) {
        self.shutdown.trigger(ShutdownReason::Requested);

        if self.teardown_started.swap(true, Ordering::SeqCst) {
            self.state.wait_for(BootstrapState::Stopped).await;
            return;
        }

        if let Err(e) = self.state.advance(BootstrapState::ShuttingDown) {
            tracing::warn!("{}", e);
        }
        self.engine.terminate();
        self.server.stop().await;
        if let Err(e) = self.state.advance(BootstrapState::Stopped) {
            tracing::warn!("{}", e);
        }
        tracing::info!("Session stopped");
    }

    /// Serve until a signal, a window close or an explicit trigger, then
    /// shut down.
    pub async fn run_until_shutdown(mut self) -> Result<(), ShellError> {
        let mut events = self.events.take();

        let reason = tokio::select! {
            reason = wait_for_signal() => reason,
            reason = wait_for_window(&mut events) => reason,
            reason = self.shutdown.triggered() => reason,
        };

        self.shutdown.trigger(reason);
        let reason = self.shutdown.reason().unwrap_or(reason);
        tracing::info!("Shutting down ({})", reason);
        self.shutdown().await;
        Ok(())
    }
}

async fn wait_for_window(events: &mut Option<UnboundedReceiver<EngineEvent>>) -> ShutdownReason {
    let Some(events) = events.as_mut() else {
        return std::future::pending().await;
    };
    match events.recv().await {
        Some(EngineEvent::WindowClosed) => ShutdownReason::WindowClosed,
        Some(EngineEvent::Terminated) | None => ShutdownReason::EngineExited,
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::warn!("Failed to listen for SIGTERM: {}", e);
            return wait_for_ctrl_c().await;
        }
    };
    tokio::select! {
        reason = wait_for_ctrl_c() => reason,
        _ = terminate.recv() => {
            tracing::info!("Received SIGTERM signal");
            ShutdownReason::Signal
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> ShutdownReason {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> ShutdownReason {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received SIGINT signal");
            ShutdownReason::Signal
        }
        Err(e) => {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending().await
        }
    }
}
