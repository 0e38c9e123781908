// desktop-shell/src/engine/mod.rs
// The rendering-engine capability the shell drives.
//
// A native webview binding implements BrowserEngine by wiring the pinner
// into its certificate-error callback and the credentials into its
// before-resource-load hook. HeadlessEngine does the same over a pinned
// HTTPS client and is what the shell runs without a native window.

pub mod headless;

use std::net::SocketAddr;

use async_trait::async_trait;
use common::{SharedSecret, ShellError};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::pinning::TrustPinner;

pub use headless::HeadlessEngine;

/// Secret header attached to every request the page makes to the loopback host
#[derive(Debug, Clone)]
pub struct RequestCredentials {
    pub host: String,
    pub header_name: String,
    pub secret: SharedSecret,
}

impl RequestCredentials {
    /// Only the loopback host, and only over TLS, ever sees the secret
    pub fn applies_to(&self, url: &Url) -> bool {
        url.scheme() == "https"
            && url
                .host_str()
                .map(|host| host.eq_ignore_ascii_case(&self.host))
                .unwrap_or(false)
    }
}

/// A request originating from the rendered page
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub method: Method,
    pub url: Url,
    pub json: Option<Value>,
}

impl PageRequest {
    pub fn get(url: Url) -> Self {
        Self { method: Method::GET, url, json: None }
    }

    pub fn post_json(url: Url, json: Value) -> Self {
        Self { method: Method::POST, url, json: Some(json) }
    }
}

#[derive(Debug, Clone)]
pub struct PageResponse {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub body: String,
}

/// Lifecycle notifications from the engine's own thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    WindowClosed,
    Terminated,
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Must be installed before `launch`; replaces CA validation entirely
    fn install_trust_pinner(&mut self, pinner: TrustPinner);

    fn install_request_credentials(&mut self, credentials: RequestCredentials);

    /// Start the engine's event loop. `server_addr` is where the loopback
    /// hostname resolves to.
    fn launch(&mut self, server_addr: SocketAddr) -> Result<(), ShellError>;

    async fn request(&self, request: PageRequest) -> Result<PageResponse, ShellError>;

    /// Top-level navigation
    async fn navigate(&self, url: Url) -> Result<PageResponse, ShellError> {
        self.request(PageRequest::get(url)).await
    }

    /// Hand out the event stream. Only the first call returns it.
    fn take_events(&mut self) -> Option<UnboundedReceiver<EngineEvent>>;

    /// Stop the event loop. Safe to call any number of times.
    fn terminate(&self);

    fn is_running(&self) -> bool;
}
