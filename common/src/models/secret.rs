// common/src/models/secret.rs
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Per-process token every loopback request must present.
///
/// Cloning hands out another read-only reference to the same value. `Debug`
/// and `Display` never print the value itself.
#[derive(Clone)]
pub struct SharedSecret(Arc<str>);

impl SharedSecret {
    pub fn new(value: String) -> Self {
        Self(Arc::from(value))
    }

    /// Compare a presented value against the secret in constant time
    pub fn matches(&self, candidate: &str) -> bool {
        constant_time_compare(candidate, &self.0)
    }

    /// The raw value. Only for wiring it into the engine and cookies.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

impl fmt::Display for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Length-independent constant-time string comparison
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let max_len = std::cmp::max(a.len(), b.len());

    // Different pad bytes so unequal lengths can never compare equal
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];

    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let same_len = (a.len() as u64).ct_eq(&(b.len() as u64));
    let same_bytes = a_padded.ct_eq(&b_padded);

    bool::from(same_len & same_bytes)
}
