// web-server/src/lib.rs
pub mod api;
pub mod middleware;
pub mod server;
pub mod tls;

pub use middleware::{AuthChannel, AuthPolicy, AuthRejected, RequestAuthGuard};
pub use server::{LoopbackServer, RunningServer};
