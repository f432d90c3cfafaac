//! Error type shared by the notification services.

use tidings_core::error::CoreError;

/// Failure of a notification or subscription operation.
///
/// Channel failures never surface here; the dispatcher records them in
/// its [`DeliveryReport`](crate::delivery::DeliveryReport).
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ActivityError {
    pub fn validation(message: impl Into<String>) -> Self {
        ActivityError::Core(CoreError::Validation(message.into()))
    }
}
