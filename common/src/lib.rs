pub mod config;
pub mod errors;
pub mod identity;
pub mod keystore;
pub mod models;
pub mod token;
pub mod utils;

pub use self::config::*;
pub use errors::ShellError;
pub use identity::{CertificateAuthority, Identity};
pub use keystore::{ProtectedKeyStore, TlsMaterial};
pub use models::secret::SharedSecret;
pub use self::utils::*;
