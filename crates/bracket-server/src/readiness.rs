//! Readiness probe: waits until a backend accepts TCP connections and
//! answers its health endpoint.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Probe timing and target path.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Overall deadline across both stages.
    pub timeout: Duration,
    /// Delay between attempts; also bounds each single attempt.
    pub interval: Duration,
    /// Path polled over HTTP once the port is open.
    pub health_path: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_secs(1),
            health_path: "/health".to_string(),
        }
    }
}

/// Probe stage that was running when the deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Tcp,
    Http,
}

/// Summary of a successful probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Errors returned by [`wait_for_backend`].
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The backend did not become ready before the deadline.
    #[error("backend at {addr} not ready after {attempts} attempts ({stage:?} stage)")]
    Timeout {
        addr: SocketAddr,
        stage: ProbeStage,
        attempts: u32,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Polls `addr` until it accepts a TCP connection and then until its health
/// endpoint returns a success status.
///
/// # Errors
///
/// Returns `ReadinessError::Timeout` once `settings.timeout` has elapsed.
pub async fn wait_for_backend(
    addr: SocketAddr,
    settings: &ProbeSettings,
) -> Result<ProbeReport, ReadinessError> {
    let started = Instant::now();
    let deadline = started + settings.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match tokio::time::timeout(settings.interval, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                tracing::debug!(%addr, attempt = attempts, "backend port is open");
                break;
            }
            Ok(Err(e)) => tracing::debug!(%addr, attempt = attempts, error = %e, "port not open yet"),
            Err(_) => tracing::debug!(%addr, attempt = attempts, "connect attempt timed out"),
        }
        if Instant::now() + settings.interval > deadline {
            return Err(ReadinessError::Timeout {
                addr,
                stage: ProbeStage::Tcp,
                attempts,
            });
        }
        tokio::time::sleep(settings.interval).await;
    }

    let client = reqwest::Client::builder()
        .timeout(settings.interval.max(Duration::from_millis(250)))
        .build()?;
    let url = format!("http://{addr}{}", settings.health_path);

    loop {
        attempts += 1;
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let elapsed = started.elapsed();
                tracing::info!(%url, attempts, elapsed_ms = elapsed.as_millis() as u64, "backend is ready");
                return Ok(ProbeReport { attempts, elapsed });
            }
            Ok(resp) => {
                tracing::debug!(%url, attempt = attempts, status = %resp.status(), "backend not healthy yet");
            }
            Err(e) => tracing::debug!(%url, attempt = attempts, error = %e, "health request failed"),
        }
        if Instant::now() + settings.interval > deadline {
            return Err(ReadinessError::Timeout {
                addr,
                stage: ProbeStage::Http,
                attempts,
            });
        }
        tokio::time::sleep(settings.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    fn fast() -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_millis(600),
            interval: Duration::from_millis(50),
            ..ProbeSettings::default()
        }
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn closed_port_times_out_in_tcp_stage() {
        let addr = closed_port().await;
        let err = wait_for_backend(addr, &fast()).await.unwrap_err();
        match err {
            ReadinessError::Timeout { stage, attempts, .. } => {
                assert_eq!(stage, ProbeStage::Tcp);
                assert!(attempts > 1, "should have retried");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn healthy_backend_is_ready() {
        let addr = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        let report = wait_for_backend(addr, &fast()).await.expect("backend should be ready");
        assert!(report.attempts >= 2, "tcp and http stages each take an attempt");
    }

    #[tokio::test]
    async fn unhealthy_backend_times_out_in_http_stage() {
        let addr = serve(Router::new().route(
            "/health",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let err = wait_for_backend(addr, &fast()).await.unwrap_err();
        assert!(matches!(
            err,
            ReadinessError::Timeout {
                stage: ProbeStage::Http,
                ..
            }
        ));
    }
}
