//! Error types shared by the auth, fetch and normalization layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The auth provider never became available. Fatal for the session.
    #[error("Google sign-in failed to load: {0}")]
    AuthInit(String),

    #[error(
        "Could not open a browser window to sign in. Allow the browser to launch, \
         or rerun with --no-browser and open the printed URL yourself"
    )]
    PopupBlocked,

    #[error("Sign-in error: {0}")]
    Auth(String),

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// The session could not produce a token outside the skew window.
    #[error("Session expired, please sign in again: {0}")]
    AuthExpired(String),

    #[error("Access denied. Please check Gmail API permissions and ensure the API is enabled.")]
    Permission,

    #[error("Authentication expired or invalid. Please sign in again.")]
    InvalidToken,

    #[error("Gmail API Error: {0}")]
    Api(String),

    #[error("Failed to decode message body: {0}")]
    Decode(String),

    #[error("Failed to generate posts: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Errors after which the stored session is no longer usable.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Error::InvalidToken | Error::AuthExpired(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
