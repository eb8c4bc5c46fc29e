use std::io::Write;
use std::sync::Arc;

use remoteopsd::config::ServiceConfig;
use remoteopsd::dispatch::{InlineContext, OperationListener, RemoteOperationResult};
use remoteopsd::http_session::HttpSessionFactory;
use remoteopsd::request::{OperationRequest, ParamValue, params};
use remoteopsd::service::{Binder, OperationsService};
use remoteopsd::storage::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run,
    Forget(String),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--forget" => {
                let Some(account) = args.next() else {
                    anyhow::bail!("--forget needs an account name");
                };
                mode = CliMode::Forget(account);
            }
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

/// Prints every finished operation as one JSON line.
struct StdoutPrinter;

impl OperationListener for StdoutPrinter {
    fn on_operation_finished(&self, result: &RemoteOperationResult) {
        print_line(&json!({ "result": result }));
    }
}

fn print_line(value: &serde_json::Value) {
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = writeln!(stdout, "{value}").and_then(|()| stdout.flush()) {
        warn!("failed to write to stdout: {err}");
    }
}

fn init_logging(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Account named by a request, if any, so an in-memory password can be
/// registered for it before submission.
fn requested_account(request: &OperationRequest) -> Option<&str> {
    match request.params.get(params::ACCOUNT) {
        Some(ParamValue::Str(account)) if !account.is_empty() => Some(account),
        _ => None,
    }
}

async fn serve_stdin(
    binder: &Binder,
    memory: Option<(&MemoryCredentialStore, &str)>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let request: OperationRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                print_line(&json!({ "line": line_no, "error": format!("invalid request: {err}") }));
                continue;
            }
        };
        if let (Some((store, password)), Some(account)) = (memory, requested_account(&request)) {
            store.save_password(account, password)?;
        }
        match binder.queue_request(&request) {
            Ok(id) => print_line(&json!({ "line": line_no, "queued": id, "action": request.action })),
            Err(err) => print_line(&json!({ "line": line_no, "error": err.to_string() })),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    let config = ServiceConfig::from_env();
    match mode {
        CliMode::Forget(account) => {
            let store = KeyringCredentialStore::new(config.keyring_service.clone());
            store.forget(&account)?;
            eprintln!("[remoteopsd] stored credentials for {account} removed");
            return Ok(());
        }
        CliMode::Help => {
            println!("Usage: remoteopsd [--forget <account>]");
            println!("  Reads one JSON operation request per stdin line and prints results.");
            println!("  --forget <account>   Remove stored password and session cookies and exit");
            return Ok(());
        }
        CliMode::Run => {}
    }
    init_logging(&config);

    let memory = config
        .password
        .as_ref()
        .map(|_| Arc::new(MemoryCredentialStore::default()));
    let store: Arc<dyn CredentialStore> = match &memory {
        Some(memory) => Arc::clone(memory) as Arc<dyn CredentialStore>,
        None => Arc::new(KeyringCredentialStore::new(config.keyring_service.clone())),
    };
    let factory = Arc::new(HttpSessionFactory::new(store, config.account_scope.clone()));
    let service = OperationsService::start(factory, &config)?;
    let binder = service.bind();
    binder.add_listener(Arc::new(StdoutPrinter), Arc::new(InlineContext));

    let memory = memory.as_deref().zip(config.password.as_deref());
    let served = serve_stdin(&binder, memory).await;

    info!("input closed, waiting for queued operations");
    service.wait_idle().await;
    drop(binder);
    tokio::task::block_in_place(|| service.shutdown());
    served
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(args(&["remoteopsd"])).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_forget() {
        let mode = parse_cli_mode(args(&["remoteopsd", "--forget", "alice@cloud"])).unwrap();
        assert_eq!(mode, CliMode::Forget("alice@cloud".into()));
    }

    #[test]
    fn parse_cli_mode_requires_forget_account() {
        assert!(parse_cli_mode(args(&["remoteopsd", "--forget"])).is_err());
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(args(&["remoteopsd", "-h"])).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(args(&["remoteopsd", "--logout"])).is_err());
    }

    #[test]
    fn requested_account_ignores_missing_or_mistyped_values() {
        let named = OperationRequest::new("GET_USER_NAME").with_str(params::ACCOUNT, "alice@cloud");
        let typed = OperationRequest::new("GET_USER_NAME").with_int(params::ACCOUNT, 7);
        assert_eq!(requested_account(&named), Some("alice@cloud"));
        assert_eq!(requested_account(&typed), None);
        assert_eq!(requested_account(&OperationRequest::new("GET_USER_NAME")), None);
    }
}
