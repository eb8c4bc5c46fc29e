use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use remoteops_core::{ClientError, Credentials, DavClient, OcsClient};
use reqwest::Client;
use reqwest::cookie::{CookieStore, Jar};
use tracing::{debug, info, warn};
use url::Url;

use crate::dispatch::{Account, ClientSession, SessionError, SessionFactory, Target};
use crate::storage::CredentialStore;

struct LiveJar {
    server_url: Url,
    jar: Arc<Jar>,
}

/// Builds real HTTP sessions. Every account gets one cookie jar shared by
/// both client generations; jars are written back to the credential store
/// by [`SessionFactory::persist_all`].
pub struct HttpSessionFactory {
    store: Arc<dyn CredentialStore>,
    scope: String,
    jars: Mutex<HashMap<String, LiveJar>>,
}

impl HttpSessionFactory {
    pub fn new(store: Arc<dyn CredentialStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: scope.into(),
            jars: Mutex::new(HashMap::new()),
        }
    }

    fn jars(&self) -> MutexGuard<'_, HashMap<String, LiveJar>> {
        self.jars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn jar_for(&self, account: &Account) -> Result<Arc<Jar>, SessionError> {
        if let Some(live) = self.jars().get(account.name()) {
            return Ok(Arc::clone(&live.jar));
        }
        let jar = Arc::new(Jar::default());
        if let Some(saved) = self.store.cookies(account.name())? {
            for cookie in saved.split(';').map(str::trim).filter(|c| !c.is_empty()) {
                jar.add_cookie_str(cookie, account.server_url());
            }
            debug!(account = account.name(), "restored saved session cookies");
        }
        self.jars().insert(
            account.name().to_string(),
            LiveJar {
                server_url: account.server_url().clone(),
                jar: Arc::clone(&jar),
            },
        );
        Ok(jar)
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn build_session(&self, target: &Target) -> Result<ClientSession, SessionError> {
        let legacy = match target {
            Target::Account(account) => {
                let password = self
                    .store
                    .password(account.name())?
                    .ok_or_else(|| SessionError::MissingCredentials(account.name().to_string()))?;
                let jar = self.jar_for(account)?;
                let http = Client::builder()
                    .cookie_provider(jar)
                    .build()
                    .map_err(ClientError::from)?;
                DavClient::with_http(
                    http,
                    account.server_url().clone(),
                    Some(Credentials::new(account.user(), password)),
                )
            }
            Target::Server(url) => DavClient::with_http(Client::new(), url.clone(), None),
        };
        Ok(ClientSession::new(target.clone(), legacy))
    }

    async fn upgrade(&self, session: &ClientSession) -> Result<OcsClient, SessionError> {
        let legacy = session.legacy();
        Ok(OcsClient::with_http(
            legacy.http().clone(),
            legacy.base_url().clone(),
            legacy.credentials().cloned(),
        ))
    }

    fn persist_all(&self, scope: &str) -> Result<(), SessionError> {
        if scope != self.scope {
            debug!(scope, own = %self.scope, "ignoring persist request for another scope");
            return Ok(());
        }
        let jars = self.jars();
        let mut saved = 0;
        for (account, live) in jars.iter() {
            let Some(header) = live.jar.cookies(&live.server_url) else {
                continue;
            };
            match header.to_str() {
                Ok(cookies) => {
                    self.store.save_cookies(account, cookies)?;
                    saved += 1;
                }
                Err(err) => warn!(account = %account, "skipping unreadable cookies: {err}"),
            }
        }
        info!(scope, saved, "persisted client sessions");
        Ok(())
    }
}
