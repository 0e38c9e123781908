pub mod auth_guard;

pub use auth_guard::{AuthChannel, AuthPolicy, AuthRejected, RequestAuthGuard};
