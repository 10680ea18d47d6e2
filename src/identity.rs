//! Caller identity and the administrator guard
//!
//! The administrator credential is whatever identity metadata the host
//! attached to the transaction that initialized the store. Mutations are
//! authorized by comparing the caller's metadata to it byte for byte.
//! This is an equality check, not a signature verification.

use crate::error::AppError;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Identity metadata the host attached to the current invocation.
///
/// `None` means the host could not supply any metadata at all, which is
/// different from supplying an empty blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    metadata: Option<Vec<u8>>,
}

impl CallerIdentity {
    pub fn new(metadata: impl Into<Vec<u8>>) -> Self {
        Self {
            metadata: Some(metadata.into()),
        }
    }

    /// A caller for whom the host has no metadata
    pub fn unavailable() -> Self {
        Self { metadata: None }
    }

    /// Retrieve the caller's metadata from the host
    pub fn metadata(&self) -> Result<&[u8], AppError> {
        self.metadata.as_deref().ok_or_else(|| {
            AppError::IdentityUnavailable("Failed getting caller metadata".to_string())
        })
    }
}

/// Stored administrator credential (opaque bytes)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminCredential(Vec<u8>);

impl AdminCredential {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short SHA-256 fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }
    let digest = format!("{:x}", Sha256::digest(bytes));
    digest[..16].to_string()
}

/// Authorizes mutating calls against the stored administrator credential
pub struct IdentityGuard;

impl IdentityGuard {
    /// Capture the initializing caller as administrator.
    ///
    /// Missing or empty metadata still yields a credential (an empty one).
    /// An empty credential matches any caller presenting empty metadata.
    pub fn admin_from_caller(caller: &CallerIdentity) -> AdminCredential {
        let credential = match caller.metadata() {
            Ok(bytes) => AdminCredential::from_bytes(bytes),
            Err(_) => {
                warn!("Failed getting metadata for the initializing caller");
                AdminCredential::default()
            }
        };
        if credential.is_empty() {
            warn!("Invalid admin certificate: metadata is empty");
        }
        debug!("The administrator is [{}]", credential.fingerprint());
        credential
    }

    /// True iff the caller's metadata equals the stored credential exactly.
    pub fn check_caller(stored: &AdminCredential, caller: &CallerIdentity) -> Result<bool, AppError> {
        let presented = caller.metadata()?;

        debug!(
            "Checking caller: stored [{}] presented [{}]",
            stored.fingerprint(),
            fingerprint(presented)
        );

        let ok = stored.as_bytes() == presented;
        if !ok {
            warn!("Caller metadata does not match the administrator credential");
        }
        Ok(ok)
    }
}
