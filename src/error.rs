use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Local storage read/write failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// The remote store rejected a create/update/delete.
    #[error("remote write rejected: {0}")]
    RemoteWrite(RemoteError),

    /// A cloud operation was attempted without a signed-in identity.
    #[error("cloud operation requires a signed-in identity")]
    InvalidIdentity,

    /// The live feed failed; a one-shot snapshot stands in until the next subscribe.
    #[error("subscription failed: {0}")]
    Subscription(RemoteError),

    #[error("subscription failed ({subscription}) and fallback fetch failed ({fallback})")]
    SubscriptionFallback {
        subscription: RemoteError,
        fallback: RemoteError,
    },

    #[error("invalid import: {0}")]
    ImportValidation(String),

    #[error("no remote store is configured")]
    RemoteUnavailable,

    #[error("remote store setup failed: {0}")]
    RemoteSetup(RemoteError),

    #[error("operation is only available in the local regime")]
    LocalOnly,
}

pub type Result<T, E = TaskError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_both_errors_for_failed_fallback() {
        let err = TaskError::SubscriptionFallback {
            subscription: RemoteError::Offline("listen".into()),
            fallback: RemoteError::Offline("fetch".into()),
        };
        let text = err.to_string();
        assert!(text.contains("listen"));
        assert!(text.contains("fetch"));
    }

    #[test]
    fn storage_errors_convert_into_persistence() {
        let io = std::io::Error::other("disk full");
        let err: TaskError = StorageError::from(io).into();
        assert!(matches!(err, TaskError::Persistence(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn degraded_feed_message_names_the_cause() {
        let err = TaskError::Subscription(RemoteError::Closed);
        assert_eq!(err.to_string(), "subscription failed: remote channel closed");
    }
}
