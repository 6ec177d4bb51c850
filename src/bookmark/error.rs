// Error taxonomy for per-event processing.
//
// Duplicates and late removes are not errors: they surface as
// AddOutcome::AlreadyExists / RemoveOutcome::NotFound and end the event
// quietly. Everything here is logged by the dispatcher and dropped; none of
// it is fatal to the process.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use super::link::LinkError;

#[derive(Debug, Error)]
pub enum BookmarkError {
    /// A call to the message store failed. Ledger state is unchanged or has
    /// been rolled back.
    #[error("{operation} failed: {detail}")]
    TransientExternalFailure {
        operation: &'static str,
        detail: String,
    },

    /// A call to the message store did not answer in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The event referenced something without the expected structure, e.g. a
    /// private copy without a parseable Source link.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The ledger itself failed.
    #[error("ledger {operation} failed: {detail}")]
    Ledger {
        operation: &'static str,
        detail: String,
    },
}

impl BookmarkError {
    pub fn external(operation: &'static str, error: anyhow::Error) -> Self {
        Self::TransientExternalFailure {
            operation,
            detail: format!("{error:#}"),
        }
    }

    pub fn ledger(operation: &'static str, error: anyhow::Error) -> Self {
        Self::Ledger {
            operation,
            detail: format!("{error:#}"),
        }
    }

    /// Whether the failure came from the message store (including timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientExternalFailure { .. } | Self::Timeout { .. }
        )
    }
}

impl From<LinkError> for BookmarkError {
    fn from(e: LinkError) -> Self {
        Self::MalformedInput(e.to_string())
    }
}

/// Run one message-store call under a deadline, mapping both failure and
/// expiry into `BookmarkError`.
pub async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, BookmarkError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BookmarkError::external(operation, e)),
        Err(_) => Err(BookmarkError::Timeout {
            operation,
            after: timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_success() {
        let value = with_timeout(Duration::from_secs(1), "fetch_message", async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn maps_failure_with_context_chain() {
        use anyhow::Context;
        let err = with_timeout(Duration::from_secs(1), "send_embed", async {
            Err::<(), _>(anyhow::anyhow!("403 Forbidden")).context("Discord POST failed")
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        let text = err.to_string();
        assert!(text.starts_with("send_embed failed"));
        assert!(text.contains("403 Forbidden"));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_slow_calls() {
        let err = with_timeout(Duration::from_millis(50), "fetch_message", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BookmarkError::Timeout { operation: "fetch_message", .. }));
    }

    #[test]
    fn link_errors_are_malformed_input() {
        let err: BookmarkError = LinkError::Missing.into();
        assert!(matches!(err, BookmarkError::MalformedInput(_)));
        assert!(!err.is_transient());
    }
}
