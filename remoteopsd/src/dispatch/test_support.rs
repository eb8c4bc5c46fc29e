//! Fakes shared by the engine tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use remoteops_core::{ClientError, Credentials, DavClient, OcsClient};
use reqwest::StatusCode;

use super::listeners::OperationListener;
use super::operation::{
    ClientHandle, ClientSupport, Generation, OperationError, OperationOutput, RemoteOperation,
    RemoteOperationResult,
};
use super::session::{ClientSession, SessionError, SessionFactory};
use super::target::Target;

const UNROUTABLE: &str = "http://127.0.0.1:9";

#[derive(Default)]
pub struct CountingFactory {
    builds: AtomicUsize,
    upgrades: AtomicUsize,
    persisted: Mutex<Vec<String>>,
    failing: Vec<String>,
    no_upgrade: bool,
}

impl CountingFactory {
    pub fn failing_for(account: &str) -> Self {
        Self {
            failing: vec![account.to_string()],
            ..Self::default()
        }
    }

    pub fn without_upgrade(mut self) -> Self {
        self.no_upgrade = true;
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> Vec<String> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionFactory for CountingFactory {
    async fn build_session(&self, target: &Target) -> Result<ClientSession, SessionError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let name = target.to_string();
        if self.failing.contains(&name) {
            return Err(SessionError::MissingCredentials(name));
        }
        let creds = target
            .account()
            .map(|account| Credentials::new(account.user(), "pw"));
        let legacy = DavClient::new(UNROUTABLE, creds)?;
        Ok(ClientSession::new(target.clone(), legacy))
    }

    async fn upgrade(&self, session: &ClientSession) -> Result<OcsClient, SessionError> {
        if self.no_upgrade {
            return Err(SessionError::Unavailable(
                Generation::Current,
                session.target().to_string(),
            ));
        }
        self.upgrades.fetch_add(1, Ordering::SeqCst);
        Ok(OcsClient::new(UNROUTABLE, None)?)
    }

    fn persist_all(&self, scope: &str) -> Result<(), SessionError> {
        self.persisted.lock().unwrap().push(scope.to_string());
        Ok(())
    }
}

/// Records which client generation it was handed.
#[derive(Debug)]
pub struct ProbeOp {
    support: ClientSupport,
    ran_on: Mutex<Vec<Generation>>,
}

impl ProbeOp {
    pub fn new(support: ClientSupport) -> Self {
        Self {
            support,
            ran_on: Mutex::new(Vec::new()),
        }
    }

    pub fn ran_on(&self) -> Vec<Generation> {
        self.ran_on.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteOperation for ProbeOp {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn client_support(&self) -> ClientSupport {
        self.support
    }

    async fn run(&self, client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        self.ran_on.lock().unwrap().push(client.generation());
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    NotFound,
    Panic,
    /// Sleeps before succeeding, keeping the worker busy.
    Slow(Duration),
}

/// Appends its label to a shared log when it runs, then follows its script.
#[derive(Debug)]
pub struct ScriptedOp {
    label: String,
    script: Script,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOp {
    pub fn new(label: &str, script: Script, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            script,
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl RemoteOperation for ScriptedOp {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn client_support(&self) -> ClientSupport {
        ClientSupport::Legacy
    }

    async fn run(&self, _client: ClientHandle<'_>) -> Result<OperationOutput, OperationError> {
        self.log.lock().unwrap().push(self.label.clone());
        match self.script {
            Script::Succeed => Ok(Some(serde_json::json!({ "label": self.label }))),
            Script::NotFound => Err(OperationError::Client(ClientError::Api {
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            })),
            Script::Panic => panic!("scripted panic in {}", self.label),
            Script::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
        }
    }
}

/// Listener that keeps every result it is handed.
#[derive(Default)]
pub struct Recorder {
    results: Mutex<Vec<RemoteOperationResult>>,
    panics: bool,
}

impl Recorder {
    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub fn results(&self) -> Vec<RemoteOperationResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.results().iter().map(|r| r.operation_name).collect()
    }

    pub async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.results.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listener did not receive enough results");
    }
}

impl OperationListener for Recorder {
    fn on_operation_finished(&self, result: &RemoteOperationResult) {
        if self.panics {
            panic!("listener exploded");
        }
        self.results.lock().unwrap().push(result.clone());
    }
}
