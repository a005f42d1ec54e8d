use keyring::Entry;
use tracing::{debug, warn};

pub const KEYRING_SERVICE_NAME: &str = "inboxpost-gmail-credentials";
pub const KEYRING_TOKEN_USER: &str = "access_token";
pub const KEYRING_EXPIRY_USER: &str = "expires_at_ms";

/// Tokens are refreshed this long before they actually expire.
pub const EXPIRY_SKEW_MS: i64 = 300_000;

/// A bearer token and the absolute time (epoch milliseconds) it stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at_ms: i64,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at_ms: i64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at_ms,
        }
    }

    /// True once `now_ms` is inside the skew window before expiry.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms.saturating_sub(EXPIRY_SKEW_MS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp_millis())
    }
}

// Define a trait for Keyring operations to allow mocking
#[cfg_attr(test, mockall::automock)]
pub trait KeyringEntry: Send + Sync {
    fn get_password(&self) -> Result<String, keyring::Error>;
    fn set_password(&self, password: &str) -> Result<(), keyring::Error>;
    fn delete_password(&self) -> Result<(), keyring::Error>;
}

// Implement the trait for the real keyring::Entry
impl KeyringEntry for Entry {
    fn get_password(&self) -> Result<String, keyring::Error> {
        self.get_password()
    }
    fn set_password(&self, password: &str) -> Result<(), keyring::Error> {
        self.set_password(password)
    }
    fn delete_password(&self) -> Result<(), keyring::Error> {
        self.delete_password()
    }
}

/// Durable storage for the single live credential.
///
/// Implementations never fail: storage problems are logged and a missing or
/// unreadable credential is reported as `None`.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<Credential>;
    fn save(&self, credential: &Credential);
    fn clear(&self);
}

/// Keeps the token and its expiry as two entries in the system keyring.
///
/// The two writes are not atomic; a torn pair is repaired by the next
/// successful sign-in or refresh.
pub struct KeyringCredentialStore<K: KeyringEntry> {
    token: K,
    expiry: K,
}

impl KeyringCredentialStore<Entry> {
    pub fn open() -> Result<Self, keyring::Error> {
        Ok(Self {
            token: Entry::new(KEYRING_SERVICE_NAME, KEYRING_TOKEN_USER)?,
            expiry: Entry::new(KEYRING_SERVICE_NAME, KEYRING_EXPIRY_USER)?,
        })
    }
}

impl<K: KeyringEntry> KeyringCredentialStore<K> {
    pub fn with_entries(token: K, expiry: K) -> Self {
        Self { token, expiry }
    }
}

fn read_entry<K: KeyringEntry>(entry: &K, what: &str) -> Option<String> {
    match entry.get_password() {
        Ok(value) => Some(value),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!("Failed to read {} from keyring: {}", what, e);
            None
        }
    }
}

impl<K: KeyringEntry> CredentialStore for KeyringCredentialStore<K> {
    fn load(&self) -> Option<Credential> {
        let token = read_entry(&self.token, "access token")?;
        let expiry = read_entry(&self.expiry, "token expiry")?;
        match expiry.parse::<i64>() {
            Ok(expires_at_ms) => Some(Credential::new(token, expires_at_ms)),
            Err(_) => {
                warn!("Ignoring stored credential with unreadable expiry {:?}", expiry);
                None
            }
        }
    }

    fn save(&self, credential: &Credential) {
        if let Err(e) = self.token.set_password(&credential.access_token) {
            warn!("Failed to save access token to keyring: {}", e);
            return;
        }
        if let Err(e) = self
            .expiry
            .set_password(&credential.expires_at_ms.to_string())
        {
            warn!("Failed to save token expiry to keyring: {}", e);
            return;
        }
        debug!("Stored credential expiring at {}", credential.expires_at_ms);
    }

    fn clear(&self) {
        for (entry, what) in [(&self.token, "access token"), (&self.expiry, "token expiry")] {
            match entry.delete_password() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => warn!("Failed to delete {} from keyring: {}", what, e),
            }
        }
    }
}
