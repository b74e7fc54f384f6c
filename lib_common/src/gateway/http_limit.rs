//! Per-IP admission for the plain HTTP routes, enforced by a `tower_governor`
//! layer keyed on the peer address. The WebSocket upgrade routes are not
//! layered with it.
//!
//! The quota is `max_requests` per `window`: a fresh address may burst up to
//! `max_requests`, and one slot is replenished every `window / max_requests`.

use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::StatusCode, middleware, response::Response, Router};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

pub const TOO_MANY_REQUESTS_BODY: &str = "Too many requests, please try again later.";

const RETAIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpLimitError {
    #[error("HTTP quota must allow at least one request per window")]
    NoRequests,
    #[error("HTTP quota window {window:?} is too short for {max_requests} requests")]
    WindowTooShort { window: Duration, max_requests: u32 },
}

/// Requests admitted per address within one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpQuota {
    window: Duration,
    max_requests: u32,
}

impl HttpQuota {
    pub fn new(window: Duration, max_requests: u32) -> Result<Self, HttpLimitError> {
        if max_requests == 0 {
            return Err(HttpLimitError::NoRequests);
        }
        if (window / max_requests).is_zero() {
            return Err(HttpLimitError::WindowTooShort { window, max_requests });
        }
        Ok(Self { window, max_requests })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Time to replenish one slot.
    pub fn replenish_period(&self) -> Duration {
        self.window / self.max_requests
    }
}

impl Default for HttpQuota {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
        }
    }
}

/// Wraps every route of `routes` in the per-IP limiter. Aged-out addresses
/// are pruned every minute until `shutdown` is cancelled.
///
/// Must be called inside a Tokio runtime.
pub fn limit_by_ip<S>(
    routes: Router<S>,
    quota: HttpQuota,
    shutdown: CancellationToken,
) -> Result<Router<S>, HttpLimitError>
where
    S: Clone + Send + Sync + 'static,
{
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .period(quota.replenish_period())
            .burst_size(quota.max_requests())
            .finish()
            .ok_or(HttpLimitError::WindowTooShort {
                window: quota.window(),
                max_requests: quota.max_requests(),
            })?,
    );

    let limiter = governor_config.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RETAIN_INTERVAL) => limiter.retain_recent(),
            }
        }
    });

    Ok(routes
        .route_layer(GovernorLayer {
            config: governor_config,
        })
        .route_layer(middleware::map_response(too_many_requests_body)))
}

/// Replaces the limiter's default rejection body, keeping its status and
/// `retry-after` headers.
async fn too_many_requests_body(response: Response) -> Response {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return response;
    }
    tracing::warn!("HTTP rate limit exceeded");
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    parts.headers.insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Response::from_parts(parts, Body::from(TOO_MANY_REQUESTS_BODY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quota_matches_api_limits() {
        let quota = HttpQuota::default();
        assert_eq!(quota.window(), Duration::from_secs(900));
        assert_eq!(quota.max_requests(), 100);
        assert_eq!(quota.replenish_period(), Duration::from_secs(9));
    }

    #[test]
    fn test_quota_rejects_degenerate_values() {
        assert_eq!(
            HttpQuota::new(Duration::from_secs(60), 0),
            Err(HttpLimitError::NoRequests)
        );
        assert!(matches!(
            HttpQuota::new(Duration::from_nanos(1), 2),
            Err(HttpLimitError::WindowTooShort { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_body_is_rewritten() {
        let rejected = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("retry-after", "9")
            .body(Body::from("Too Many Requests! Wait for 9s"))
            .unwrap();

        let response = too_many_requests_body(rejected).await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "9");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], TOO_MANY_REQUESTS_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_other_responses_pass_through() {
        let ok = Response::new(Body::from("OK"));
        let response = too_many_requests_body(ok).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
