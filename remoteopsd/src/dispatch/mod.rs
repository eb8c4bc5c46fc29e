//! The operation dispatch engine: one FIFO queue, one worker, one cached
//! client session and a listener registry with a buffer for late claimants.

pub(crate) mod executor;
pub(crate) mod listeners;
pub(crate) mod operation;
pub(crate) mod queue;
pub(crate) mod session;
pub(crate) mod target;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod worker;

pub use executor::execute;
pub use listeners::{
    ClaimStatus, DeliveryContext, InlineContext, ListenerRegistry, OperationListener,
    ResultBuffer, TokioContext,
};
pub use operation::{
    ClientHandle, ClientSupport, Failure, FailureKind, Generation, OperationError, OperationId,
    OperationOutput, Outcome, RemoteOperation, RemoteOperationResult, ResultCode, output,
};
pub use queue::{Job, JobQueue};
pub use session::{ClientSession, SessionCache, SessionError, SessionFactory};
pub use target::{Account, Target, TargetError};
