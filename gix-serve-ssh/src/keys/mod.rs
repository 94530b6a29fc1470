//! SSH public keys, where they are stored, and the `keys` commands managing them.

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use gix_serve_core::AccessPermission;
use sha2::{Digest, Sha256};

pub(crate) mod commands;
pub mod store;

/// The marker that identifies pasted private keys.
const PRIVATE_KEY_MARKER: &str = "PRIVATE KEY";

/// The error returned when parsing or changing an [`SshKey`].
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// A private key was provided.
    #[error("this looks like a private key, please provide the public key instead")]
    PrivateKey,
    /// The text is not of the form `<algorithm> <base64> [comment]`.
    #[error("malformed public key: {0}")]
    Malformed(&'static str),
    /// The key data is not valid base64.
    #[error("malformed public key data")]
    Base64(#[from] base64::DecodeError),
    /// The algorithm in the text differs from the one encoded in the key data.
    #[error("public key claims to be '{claimed}' but contains '{actual}'")]
    AlgorithmMismatch {
        /// The algorithm named in the text.
        claimed: String,
        /// The algorithm named in the key data.
        actual: String,
    },
    /// Only view, clone and push permissions may be granted to keys.
    #[error("illegal permission {0} for an SSH key, use one of V, R or RW")]
    IllegalPermission(AccessPermission),
}

/// A public key as it appears in an `authorized_keys` file, along with the permission it grants.
///
/// Keys are equal if their algorithm and key data are equal, regardless of comment and permission.
#[derive(Debug, Clone)]
pub struct SshKey {
    raw: String,
    algorithm: String,
    blob: Vec<u8>,
    comment: Option<String>,
    fingerprint: String,
    permission: AccessPermission,
}

impl PartialEq for SshKey {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.blob == other.blob
    }
}

impl Eq for SshKey {}

impl SshKey {
    /// Parse `data` of the form `<algorithm> <base64> [comment]`, with line breaks removed first.
    ///
    /// The key grants [`Push`](AccessPermission::Push) permission.
    pub fn parse(data: &str) -> Result<Self, KeyError> {
        if data.contains(PRIVATE_KEY_MARKER) {
            return Err(KeyError::PrivateKey);
        }
        let raw: String = data.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        let (algorithm, rest) = raw
            .trim()
            .split_once(char::is_whitespace)
            .ok_or(KeyError::Malformed("missing key data"))?;
        let rest = rest.trim_start();
        let (encoded, comment) = match rest.split_once(char::is_whitespace) {
            Some((encoded, comment)) => (encoded, Some(comment.trim())),
            None => (rest, None),
        };
        let blob = STANDARD.decode(encoded)?;
        let actual = embedded_algorithm(&blob).ok_or(KeyError::Malformed("truncated key data"))?;
        if actual != algorithm.as_bytes() {
            return Err(KeyError::AlgorithmMismatch {
                claimed: algorithm.to_owned(),
                actual: String::from_utf8_lossy(actual).into_owned(),
            });
        }
        Ok(SshKey {
            algorithm: algorithm.to_owned(),
            comment: comment.filter(|c| !c.is_empty()).map(ToOwned::to_owned),
            fingerprint: fingerprint(&blob),
            blob,
            raw,
            permission: AccessPermission::Push,
        })
    }

    /// The key as provided, or as regenerated after the comment changed.
    pub fn raw_data(&self) -> &str {
        &self.raw
    }

    /// The OpenSSH style SHA-256 fingerprint, like `SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8`.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The key type, like `ssh-ed25519`.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The free-form comment, if any.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// The permission this key grants.
    pub fn permission(&self) -> AccessPermission {
        self.permission
    }

    /// Replace the comment, regenerating the raw data.
    pub fn set_comment(&mut self, comment: &str) {
        let comment = comment.trim();
        self.comment = (!comment.is_empty()).then(|| comment.to_owned());
        let encoded = STANDARD.encode(&self.blob);
        self.raw = match &self.comment {
            Some(comment) => format!("{} {encoded} {comment}", self.algorithm),
            None => format!("{} {encoded}", self.algorithm),
        };
    }

    /// Grant `permission`, unless it is not above [`None`](AccessPermission::None), in which case nothing changes.
    ///
    /// Levels other than view, clone and push are refused.
    pub fn set_permission(&mut self, permission: AccessPermission) -> Result<(), KeyError> {
        if !permission.exceeds(AccessPermission::None) {
            return Ok(());
        }
        if !permission.is_ssh_level() {
            return Err(KeyError::IllegalPermission(permission));
        }
        self.permission = permission;
        Ok(())
    }

    /// Take `permission` as it was stored, including levels that deny all access.
    ///
    /// Levels above push are refused like in [`set_permission()`](Self::set_permission()).
    pub(crate) fn with_stored_permission(mut self, permission: AccessPermission) -> Result<Self, KeyError> {
        if permission.exceeds(AccessPermission::Push) {
            return Err(KeyError::IllegalPermission(permission));
        }
        self.permission = permission;
        Ok(self)
    }

    /// Return `true` if this key may be used to fetch.
    pub fn can_clone(&self) -> bool {
        self.permission.at_least(AccessPermission::Clone)
    }

    /// Return `true` if this key may be used to push.
    pub fn can_push(&self) -> bool {
        self.permission.at_least(AccessPermission::Push)
    }
}

/// The algorithm name at the start of SSH wire-format key data.
fn embedded_algorithm(blob: &[u8]) -> Option<&[u8]> {
    let len = u32::from_be_bytes(blob.get(..4)?.try_into().ok()?) as usize;
    blob.get(4..4 + len)
}

fn fingerprint(blob: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(blob)))
}
