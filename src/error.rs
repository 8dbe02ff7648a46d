//! Error taxonomy for the bridge.
//!
//! `ApiError` covers everything that can go wrong on the wire; `BridgeError`
//! is what the filesystem operations return and is mapped to a POSIX errno
//! exactly once, at the FUSE boundary.

use libc::{EBADF, EEXIST, EINVAL, EIO, ENOENT, ENOTDIR, c_int};
use thiserror::Error;

/// Failures reported by the remote SDK or the transport underneath it.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401 from the login call.
    #[error("the specified username or password is wrong")]
    BadCredentials,
    /// 401 anywhere after login; the session is no longer accepted.
    #[error("the session is no longer accepted by the remote device")]
    AuthExpired,
    /// 400; the response body is kept for diagnostics.
    #[error("the request had bad parameters: {0}")]
    BadRequest(String),
    /// Any other non-2xx status the caller did not handle explicitly.
    #[error("unexpected HTTP {status}: {body}")]
    Protocol { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Parse(#[from] serde_json::Error),
    /// A creation request answered 2xx but carried no `Location` header.
    #[error("response carried no Location header")]
    MissingLocation,
    #[error("no reachable endpoint for device {0}")]
    NoEndpoint(String),
}

impl ApiError {
    /// Whether a listing failure means the listed parent no longer exists,
    /// so its cached listing must be dropped.
    pub fn parent_vanished(&self) -> bool {
        matches!(
            self,
            ApiError::BadRequest(_) | ApiError::Protocol { status: 404, .. }
        )
    }
}

/// Result of a filesystem-level operation, before errno mapping.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no such entry")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("operation not supported")]
    Unsupported,
    /// write() arrived without a preceding create/open/truncate.
    #[error("no write session is open for this path")]
    NoWriteSession,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl BridgeError {
    pub fn errno(&self) -> c_int {
        match self {
            BridgeError::NotFound => ENOENT,
            BridgeError::NotADirectory => ENOTDIR,
            BridgeError::AlreadyExists => EEXIST,
            BridgeError::Unsupported => EINVAL,
            BridgeError::NoWriteSession => EBADF,
            BridgeError::Api(_) => EIO,
        }
    }
}
