//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::AuthError;

/// Wrap a future with a deadline.
///
/// An elapsed deadline is reported as a transient upstream failure.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, AuthError>>,
) -> Result<T, AuthError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::UpstreamTransient(format!(
            "timed out after {}ms",
            duration.as_millis()
        ))),
    }
}
