//! Gmail API module split into logical submodules
//!
//! This module provides all Gmail API functionality organized into:
//! - auth: Session state machine and the auth provider seam
//! - credentials: Keyring persistence for the live credential
//! - provider: yup-oauth2 installed-app implementation of the provider
//! - messages: Message listing and fetching

pub mod auth;
pub mod credentials;
pub mod messages;
pub mod provider;

pub use auth::{
    AuthProvider, AuthResponse, AuthSession, AuthState, ClientConfig, ProviderError, RetryPolicy,
    SignInOptions, TokenSource, GMAIL_READONLY_SCOPE,
};
pub use credentials::{
    Credential, CredentialStore, KeyringCredentialStore, KeyringEntry, EXPIRY_SKEW_MS,
    KEYRING_SERVICE_NAME,
};
pub use messages::{MessageFetcher, GMAIL_API_BASE_URL, INBOX_FILTER};
pub use provider::InstalledFlowProvider;
