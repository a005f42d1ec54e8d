use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::{AccessToken, ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

use super::auth::{AuthProvider, AuthResponse, ClientConfig, ProviderError, SignInOptions};

// Google access tokens live for an hour when the response omits an expiry.
const DEFAULT_TOKEN_LIFETIME_MS: i64 = 3_600_000;

/// Installed-app OAuth flow backed by `yup-oauth2`.
///
/// The authenticator keeps its tokens (including the refresh token) in the
/// configured token cache file, so "signed in" means that file exists.
pub struct InstalledFlowProvider {
    client_secret_path: PathBuf,
    open_browser: bool,
    secret: Mutex<Option<ApplicationSecret>>,
    session: Mutex<Option<FlowSession>>,
}

struct FlowSession {
    authenticator: DefaultAuthenticator,
    config: ClientConfig,
}

impl InstalledFlowProvider {
    pub fn new(client_secret_path: impl Into<PathBuf>, open_browser: bool) -> Self {
        Self {
            client_secret_path: client_secret_path.into(),
            open_browser,
            secret: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    async fn loaded_secret(&self) -> Result<ApplicationSecret, ProviderError> {
        self.secret.lock().await.clone().ok_or_else(|| {
            ProviderError::Failed("client secret has not been loaded".to_string())
        })
    }

    async fn build(
        &self,
        config: &ClientConfig,
        delegate: BrowserDelegate,
    ) -> Result<DefaultAuthenticator, ProviderError> {
        let secret = self.loaded_secret().await?;
        InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
            .persist_tokens_to_disk(&config.token_cache)
            .flow_delegate(Box::new(delegate))
            .build()
            .await
            .map_err(|e| ProviderError::Failed(format!("failed to build authenticator: {}", e)))
    }

    fn delegate(&self, select_account: bool) -> BrowserDelegate {
        BrowserDelegate::new(self.open_browser, select_account, launch_browser)
    }

    async fn consent(
        &self,
        config: &ClientConfig,
        select_account: bool,
    ) -> Result<(DefaultAuthenticator, AuthResponse), ProviderError> {
        let delegate = self.delegate(select_account);
        let blocked = delegate.blocked.clone();
        let authenticator = self.build(config, delegate).await?;
        let token = authenticator
            .token(&config.scopes)
            .await
            .map_err(|e| flow_error(e, blocked.load(Ordering::SeqCst)))?;
        Ok((authenticator, to_auth_response(token)?))
    }
}

fn flow_error(err: impl fmt::Display, browser_blocked: bool) -> ProviderError {
    if browser_blocked {
        ProviderError::PopupBlocked
    } else {
        ProviderError::Failed(err.to_string())
    }
}

fn stash_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".previous");
    PathBuf::from(name)
}

/// Move an existing token cache out of the way. Returns where it went.
async fn stash_token_cache(path: &Path) -> Result<Option<PathBuf>, ProviderError> {
    let stash = stash_path(path);
    match tokio::fs::rename(path, &stash).await {
        Ok(()) => Ok(Some(stash)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProviderError::Failed(format!(
            "failed to move token cache {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn restore_token_cache(stash: &Path, path: &Path) -> Result<(), ProviderError> {
    tokio::fs::rename(stash, path).await.map_err(|e| {
        ProviderError::Failed(format!(
            "failed to restore token cache {}: {}",
            path.display(),
            e
        ))
    })
}

async fn remove_token_cache(path: &Path) -> Result<(), ProviderError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProviderError::Failed(format!(
            "failed to remove token cache {}: {}",
            path.display(),
            e
        ))),
    }
}

fn to_auth_response(token: AccessToken) -> Result<AuthResponse, ProviderError> {
    let access_token = token
        .token()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::Failed("provider returned no access token".to_string()))?
        .to_string();
    let expires_at_ms = match token.expiration_time() {
        Some(at) => (at.unix_timestamp_nanos() / 1_000_000) as i64,
        None => chrono::Utc::now().timestamp_millis() + DEFAULT_TOKEN_LIFETIME_MS,
    };
    Ok(AuthResponse {
        access_token,
        expires_at_ms,
    })
}

#[async_trait]
impl AuthProvider for InstalledFlowProvider {
    async fn is_loaded(&self) -> bool {
        let mut secret = self.secret.lock().await;
        if secret.is_some() {
            return true;
        }
        match yup_oauth2::read_application_secret(&self.client_secret_path).await {
            Ok(loaded) => {
                *secret = Some(loaded);
                true
            }
            Err(e) => {
                debug!(
                    "Client secret {} not readable yet: {}",
                    self.client_secret_path.display(),
                    e
                );
                false
            }
        }
    }

    async fn init(&self, config: &ClientConfig) -> Result<(), ProviderError> {
        if let Some(dir) = config.token_cache.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ProviderError::Failed(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        let authenticator = self.build(config, self.delegate(false)).await?;
        *self.session.lock().await = Some(FlowSession {
            authenticator,
            config: config.clone(),
        });
        Ok(())
    }

    async fn is_signed_in(&self) -> bool {
        let session = self.session.lock().await;
        match session.as_ref() {
            Some(s) => tokio::fs::try_exists(&s.config.token_cache)
                .await
                .unwrap_or(false),
            None => false,
        }
    }

    async fn current_auth_response(&self) -> Result<AuthResponse, ProviderError> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(ProviderError::NotSignedIn)?;
        let token = session
            .authenticator
            .token(&session.config.scopes)
            .await
            .map_err(|e| ProviderError::Failed(e.to_string()))?;
        to_auth_response(token)
    }

    async fn sign_in(&self, options: &SignInOptions) -> Result<AuthResponse, ProviderError> {
        let mut session = self.session.lock().await;
        let config = session
            .as_ref()
            .map(|s| s.config.clone())
            .ok_or_else(|| ProviderError::Failed("provider is not initialized".to_string()))?;

        // A cached token would skip the consent screen entirely. The old one
        // comes back if consent does not produce a new one.
        let stash = stash_token_cache(&config.token_cache).await?;
        match self.consent(&config, options.select_account).await {
            Ok((authenticator, response)) => {
                if let Some(stash) = stash {
                    if let Err(e) = remove_token_cache(&stash).await {
                        warn!("{}", e);
                    }
                }
                *session = Some(FlowSession {
                    authenticator,
                    config,
                });
                Ok(response)
            }
            Err(e) => {
                if let Some(stash) = stash {
                    restore_token_cache(&stash, &config.token_cache).await?;
                    debug!("Restored previous token cache after failed consent");
                }
                let authenticator = self.build(&config, self.delegate(false)).await?;
                *session = Some(FlowSession {
                    authenticator,
                    config,
                });
                Err(e)
            }
        }
    }

    async fn reload_auth_response(&self) -> Result<AuthResponse, ProviderError> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(ProviderError::NotSignedIn)?;
        let token = session
            .authenticator
            .force_refreshed_token(&session.config.scopes)
            .await
            .map_err(|e| ProviderError::Failed(e.to_string()))?;
        to_auth_response(token)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let mut session = self.session.lock().await;
        if let Some(s) = session.take() {
            remove_token_cache(&s.config.token_cache).await?;
            // Rebuild so the authenticator's in-memory token is gone too.
            let authenticator = self.build(&s.config, self.delegate(false)).await?;
            *session = Some(FlowSession {
                authenticator,
                config: s.config,
            });
        }
        Ok(())
    }
}

fn launch_browser(url: &str) -> io::Result<()> {
    open::that(url)
}

/// Opens the consent URL in the user's browser instead of printing it.
#[derive(Clone)]
struct BrowserDelegate {
    open_browser: bool,
    select_account: bool,
    opener: fn(&str) -> io::Result<()>,
    blocked: Arc<AtomicBool>,
}

impl BrowserDelegate {
    fn new(open_browser: bool, select_account: bool, opener: fn(&str) -> io::Result<()>) -> Self {
        Self {
            open_browser,
            select_account,
            opener,
            blocked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn consent_url(&self, url: &str) -> String {
        if self.select_account {
            format!("{}&prompt=select_account", url)
        } else {
            url.to_string()
        }
    }
}

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.consent_url(url);
            if !self.open_browser {
                eprintln!("Open this URL in your browser to sign in:\n\n{}\n", url);
                return Ok(String::new());
            }
            match (self.opener)(&url) {
                Ok(()) => Ok(String::new()),
                Err(e) => {
                    warn!("Failed to open browser: {}", e);
                    self.blocked.store(true, Ordering::SeqCst);
                    Err(format!("could not open a browser: {}", e))
                }
            }
        })
    }
}
