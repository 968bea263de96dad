//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every downstream call
//! - Turn an elapsed deadline into a gateway error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Run `fut` with a deadline.
pub async fn with_timeout<T, F>(service: &str, timeout: Duration, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::BackendTimeout {
            service: service.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_elapsed_maps_to_backend_timeout() {
        let result: GatewayResult<()> = with_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(e @ GatewayError::BackendTimeout { .. }) => assert_eq!(e.status_code().as_u16(), 504),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = with_timeout("fast", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }
}
