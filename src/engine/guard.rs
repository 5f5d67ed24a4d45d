//! Caller-supplied bounds on store calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Timeout and cancellation applied to every store call an operation makes.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Run one store call under `opts`. Cancellation wins over completion when
/// both are ready.
pub(crate) async fn bounded<T>(
    opts: &CallOptions,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let timed = async {
        match opts.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                Error::StoreUnavailable(format!("{operation} timed out after {limit:?}"))
            })?,
            None => call.await,
        }
    };

    tokio::select! {
        biased;
        _ = opts.cancel.cancelled() => Err(Error::Cancelled),
        result = timed => result,
    }
}
