use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::SessionError;
use crate::provider::ProviderError;

/// Run a collaborator call with an upper bound on its duration.
///
/// A hung request surfaces as [`SessionError::Timeout`] naming `operation`;
/// provider failures convert through `From<ProviderError>`.
pub async fn bounded<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => {
            warn!(operation, timeout_ms = after.as_millis() as u64, "provider call timed out");
            Err(SessionError::Timeout { operation, after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let call = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ProviderError>(1)
        };
        let err = bounded("sign in", Duration::from_secs(5), call).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Timeout { operation: "sign in", after: Duration::from_secs(5) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_passes_through() {
        let call = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, ProviderError>("ok")
        };
        assert_eq!(bounded("sign in", Duration::from_secs(5), call).await, Ok("ok"));
    }

    #[tokio::test]
    async fn provider_error_is_converted() {
        let call = async {
            Err::<(), _>(ProviderError::Rejected { status: 400, message: "nope".into() })
        };
        let err = bounded("sign in", Duration::from_secs(5), call).await.unwrap_err();
        assert_eq!(err, SessionError::Auth("nope".into()));
    }
}
