use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use super::operation::{
    ClientHandle, Failure, FailureKind, Generation, OperationId, OperationOutput, Outcome,
    RemoteOperation, RemoteOperationResult,
};
use super::session::{ClientSession, SessionError, SessionFactory};
use super::target::Target;

/// Runs `operation` once on the client generation it declares, building the
/// generation-2 client lazily. `Both` operations fall back to the other
/// generation only when the preferred client cannot be obtained.
pub async fn execute(
    operation: &dyn RemoteOperation,
    session: &mut ClientSession,
    factory: &dyn SessionFactory,
) -> Result<OperationOutput, Failure> {
    let support = operation.client_support();
    let primary = support.primary();
    let generation = match ensure_generation(primary, session, factory).await {
        Ok(()) => primary,
        Err(err) => {
            let Some(fallback) = support.fallback() else {
                return Err(Failure::from(&err));
            };
            debug!(
                operation = operation.name(),
                error = %err,
                ?fallback,
                "preferred client unavailable, falling back"
            );
            ensure_generation(fallback, session, factory)
                .await
                .map_err(|err| Failure::from(&err))?;
            fallback
        }
    };

    let handle = match generation {
        Generation::Legacy => ClientHandle::Legacy(session.legacy()),
        Generation::Current => match session.current() {
            Some(client) => ClientHandle::Current(client),
            None => {
                let err = SessionError::Unavailable(generation, session.target().to_string());
                return Err(Failure::from(&err));
            }
        },
    };
    operation
        .run(handle)
        .await
        .map_err(|err| Failure::from(&err))
}

async fn ensure_generation(
    generation: Generation,
    session: &mut ClientSession,
    factory: &dyn SessionFactory,
) -> Result<(), SessionError> {
    if generation == Generation::Legacy || session.current().is_some() {
        return Ok(());
    }
    let current = factory.upgrade(session).await?;
    session.set_current(current);
    Ok(())
}

/// Turns one attempt into a result, logging failures and absorbing panics so
/// the calling worker keeps running.
pub(crate) async fn contain<F>(
    id: OperationId,
    name: &'static str,
    target: &Target,
    attempt: F,
) -> RemoteOperationResult
where
    F: Future<Output = Result<OperationOutput, Failure>>,
{
    let outcome = match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(Ok(data)) => Outcome::Success { data },
        Ok(Err(failure)) => {
            log_failure(name, target, &failure);
            Outcome::Failure(failure)
        }
        Err(panic) => {
            let failure = Failure::unexpected(panic_message(panic.as_ref()));
            log_failure(name, target, &failure);
            Outcome::Failure(failure)
        }
    };
    RemoteOperationResult::new(id, name, outcome)
}

fn log_failure(name: &'static str, target: &Target, failure: &Failure) {
    match failure.kind {
        FailureKind::Operation => warn!(
            operation = name,
            target = %target,
            code = ?failure.code,
            http_status = failure.http_status,
            "operation failed: {}",
            failure.message
        ),
        FailureKind::SessionConstruction => error!(
            operation = name,
            target = %target,
            "error while trying to get authorization: {}",
            failure.message
        ),
        FailureKind::Unexpected => error!(
            operation = name,
            target = %target,
            "unexpected error: {}",
            failure.message
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("operation panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("operation panicked: {message}")
    } else {
        "operation panicked".to_string()
    }
}
