//! Bridges callback-style backend calls into futures.
//!
//! An operation fails either while it is being initiated (the backend raised an
//! [`SdkException`](crate::database::backend::SdkException)) or later through its completion
//! callback (a [`BackendError`]). Both end up as a [`DatabaseError`](crate::database::error::DatabaseError)
//! but keep distinct kinds.

use futures::channel::oneshot;
use serde_json::Value;

use crate::database::backend::{BackendError, Completion, SdkResult, TransactionStep};
use crate::database::error::{operation_error, translate, translate_exception, DatabaseResult};

/// Resolves the pending operation; calling it more than once is impossible by construction.
pub type Settle<T> = Box<dyn FnOnce(Result<T, BackendError>) + Send>;

/// Runs `initiate` and waits for the outcome it reports through the supplied [`Settle`].
pub async fn run<T, F>(initiate: F) -> DatabaseResult<T>
where
    T: Send + 'static,
    F: FnOnce(Settle<T>) -> SdkResult<()>,
{
    let (sender, receiver) = oneshot::channel();
    let settle: Settle<T> = Box::new(move |outcome| {
        let _ = sender.send(outcome);
    });

    initiate(settle).map_err(|err| translate_exception(&err))?;

    match receiver.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(translate(&err)),
        Err(_) => Err(operation_error(
            "The backend dropped the operation without reporting an outcome",
        )),
    }
}

/// [`run`] for operations whose completion only reports an optional error.
pub async fn complete<F>(initiate: F) -> DatabaseResult<()>
where
    F: FnOnce(Completion) -> SdkResult<()>,
{
    run(|settle: Settle<()>| {
        initiate(Box::new(move |err| {
            settle(match err {
                Some(err) => Err(err),
                None => Ok(()),
            })
        }))
    })
    .await
}

/// Outcome requested by a transaction update function.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Leave the node unchanged and stop.
    Abort,
    Remove,
    Set(Value),
}

impl From<Action> for TransactionStep {
    fn from(action: Action) -> Self {
        match action {
            Action::Abort => TransactionStep::Abort,
            Action::Remove => TransactionStep::Write(Value::Null),
            Action::Set(value) => TransactionStep::Write(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::backend::{codes, SdkException};
    use crate::database::error::DatabaseErrorCode;
    use serde_json::json;

    #[tokio::test]
    async fn completion_value_is_returned() {
        let value = run(|settle: Settle<u32>| {
            std::thread::spawn(move || settle(Ok(7)));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn asynchronous_failures_are_translated() {
        let err = complete(|done| {
            done(Some(BackendError::new(codes::PERMISSION_DENIED, "nope")));
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn initiation_failures_are_operation_errors() {
        let err = complete(|_done| Err(SdkException::new("bad argument")))
            .await
            .unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::Operation);
        assert!(err.message().contains("bad argument"));
    }

    #[tokio::test]
    async fn dropped_completion_is_reported() {
        let err = complete(|done| {
            drop(done);
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.code, DatabaseErrorCode::Operation);
    }

    #[test]
    fn actions_map_to_transaction_steps() {
        assert_eq!(TransactionStep::from(Action::Abort), TransactionStep::Abort);
        assert_eq!(
            TransactionStep::from(Action::Remove),
            TransactionStep::Write(Value::Null)
        );
        assert_eq!(
            TransactionStep::from(Action::Set(json!(3))),
            TransactionStep::Write(json!(3))
        );
    }
}
