// desktop-shell/src/lib.rs
pub mod bootstrap;
pub mod engine;
pub mod pinning;
pub mod shutdown;

pub use bootstrap::{BootstrapState, RunningSession, SessionBootstrap};
pub use engine::{BrowserEngine, EngineEvent, HeadlessEngine, PageRequest, PageResponse, RequestCredentials};
pub use pinning::{PinVerdict, TrustPinner};
pub use shutdown::{ShutdownHandle, ShutdownReason};
