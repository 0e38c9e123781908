// desktop-shell/src/engine/headless.rs
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use common::{ShellError, WindowConfig};
use reqwest::redirect::Policy;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use super::{BrowserEngine, EngineEvent, PageRequest, PageResponse, RequestCredentials};
use crate::pinning::TrustPinner;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 5;

enum EngineCommand {
    Load {
        request: PageRequest,
        reply: oneshot::Sender<Result<PageResponse, ShellError>>,
    },
    CloseWindow,
    Terminate,
}

/// Windowless engine: a pinned HTTPS client driven from its own event-loop
/// thread, the same way a native webview owns its UI thread.
pub struct HeadlessEngine {
    window: WindowConfig,
    pinner: Option<TrustPinner>,
    credentials: Option<RequestCredentials>,
    commands: Option<UnboundedSender<EngineCommand>>,
    events: Option<UnboundedReceiver<EngineEvent>>,
    thread: Option<JoinHandle<()>>,
    terminated: AtomicBool,
}

impl HeadlessEngine {
    pub fn new(window: WindowConfig) -> Self {
        Self {
            window,
            pinner: None,
            credentials: None,
            commands: None,
            events: None,
            thread: None,
            terminated: AtomicBool::new(false),
        }
    }

    /// Same as the user closing the window
    pub fn close_window(&self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(EngineCommand::CloseWindow);
        }
    }

    fn build_client(pinner: &TrustPinner, server_addr: SocketAddr) -> Result<reqwest::Client, ShellError> {
        let tls = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(pinner.clone()))
            .with_no_client_auth();

        reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .cookie_store(true)
            .resolve(pinner.expected_host(), server_addr)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ShellError::Engine(format!("Failed to build engine client: {}", e)))
    }
}

#[async_trait]
impl BrowserEngine for HeadlessEngine {
    fn install_trust_pinner(&mut self, pinner: TrustPinner) {
        self.pinner = Some(pinner);
    }

    fn install_request_credentials(&mut self, credentials: RequestCredentials) {
        self.credentials = Some(credentials);
    }

    fn launch(&mut self, server_addr: SocketAddr) -> Result<(), ShellError> {
        if self.commands.is_some() {
            return Err(ShellError::Engine("engine already launched".to_string()));
        }
        let pinner = self
            .pinner
            .clone()
            .ok_or_else(|| ShellError::Engine("no trust pinner installed".to_string()))?;

        let client = Self::build_client(&pinner, server_addr)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let event_loop = EventLoop {
            client,
            pinner,
            credentials: self.credentials.clone(),
        };
        let thread = thread::Builder::new()
            .name("engine-event-loop".to_string())
            .spawn(move || event_loop.run(command_rx, event_tx))
            .map_err(|e| ShellError::Engine(format!("Failed to spawn engine thread: {}", e)))?;

        tracing::info!(
            "Launched engine window \"{}\" ({}x{})",
            self.window.title,
            self.window.width,
            self.window.height
        );

        self.commands = Some(command_tx);
        self.events = Some(event_rx);
        self.thread = Some(thread);
        Ok(())
    }

    async fn request(&self, request: PageRequest) -> Result<PageResponse, ShellError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| ShellError::Engine("engine not launched".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(EngineCommand::Load { request, reply: reply_tx })
            .map_err(|_| ShellError::Engine("engine is not running".to_string()))?;

        reply_rx
            .await
            .map_err(|_| ShellError::Engine("engine stopped before the load finished".to_string()))?
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<EngineEvent>> {
        self.events.take()
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(commands) = &self.commands {
            tracing::info!("Terminating engine");
            let _ = commands.send(EngineCommand::Terminate);
        }
    }

    fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for HeadlessEngine {
    fn drop(&mut self) {
        self.terminate();
    }
}

struct EventLoop {
    client: reqwest::Client,
    pinner: TrustPinner,
    credentials: Option<RequestCredentials>,
}

impl EventLoop {
    fn run(self, mut commands: UnboundedReceiver<EngineCommand>, events: UnboundedSender<EngineEvent>) {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Failed to start engine runtime: {}", e);
                let _ = events.send(EngineEvent::Terminated);
                return;
            }
        };

        runtime.block_on(async {
            while let Some(command) = commands.recv().await {
                match command {
                    EngineCommand::Load { request, reply } => {
                        let _ = reply.send(self.load(request).await);
                    }
                    EngineCommand::CloseWindow => {
                        tracing::info!("Engine window closed");
                        let _ = events.send(EngineEvent::WindowClosed);
                        break;
                    }
                    EngineCommand::Terminate => break,
                }
            }
        });

        tracing::debug!("Engine event loop finished");
        let _ = events.send(EngineEvent::Terminated);
    }

    async fn load(&self, request: PageRequest) -> Result<PageResponse, ShellError> {
        let rejections_before = self.pinner.rejections();

        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        if let Some(credentials) = &self.credentials {
            if credentials.applies_to(&request.url) {
                builder = builder.header(credentials.header_name.as_str(), credentials.secret.expose());
            }
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            // The URL may carry the secret, so it is stripped from errors
            Err(e) => {
                if self.pinner.rejections() > rejections_before {
                    return Err(ShellError::CertificateMismatch {
                        host: request.url.host_str().unwrap_or_default().to_string(),
                    });
                }
                return Err(ShellError::Engine(format!(
                    "{} {} failed: {}",
                    request.method,
                    request.url.path(),
                    e.without_url()
                )));
            }
        };

        let url = response.url().clone();
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ShellError::Engine(format!("Failed to read response body: {}", e.without_url())))?;

        tracing::debug!("{} {} -> {}", request.method, url.path(), status);
        Ok(PageResponse { url, status, body })
    }
}
