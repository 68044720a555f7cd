//! Passcode verification and write authorization.
//!
//! Implements constant-time digest comparison to mitigate timing attacks.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compute the lowercase hex SHA-256 digest of a passcode candidate.
pub fn hash_passcode(candidate: &str) -> String {
    hex::encode(Sha256::digest(candidate.as_bytes()))
}

/// Verify a candidate against the stored digest. Every mismatch looks the
/// same to the caller.
pub fn verify_passcode(candidate: &str, stored_hash: &str) -> bool {
    constant_time_compare(&hash_passcode(candidate), stored_hash)
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Capability check consulted before any write attempt.
#[derive(Debug, Clone)]
pub struct WriteGate {
    /// Passcode verified for this share session
    pub passcode_ok: bool,
    /// Platform sign-in completed
    pub signed_in: bool,
    /// Deployment requires a platform sign-in for edits
    pub require_signin: bool,
    /// Cleared when the store rejects our write credentials; a fresh
    /// sign-in restores it
    pub capability: bool,
    /// Departments allowed to edit; empty means unrestricted
    pub editable_departments: Vec<String>,
}

impl WriteGate {
    pub fn new(require_signin: bool, editable_departments: Vec<String>) -> Self {
        Self {
            passcode_ok: false,
            signed_in: false,
            require_signin,
            capability: true,
            editable_departments,
        }
    }

    /// Whether an edit to a record in `department` may proceed.
    pub fn can_write(&self, department: &str) -> bool {
        if !self.passcode_ok {
            return false;
        }
        if self.require_signin && !self.signed_in {
            return false;
        }
        if !self.capability {
            return false;
        }
        if !self.editable_departments.is_empty()
            && !self.editable_departments.iter().any(|d| d == department)
        {
            return false;
        }
        true
    }

    pub fn revoke(&mut self) {
        self.capability = false;
    }

    pub fn mark_signed_in(&mut self) {
        self.signed_in = true;
        self.capability = true;
    }
}
