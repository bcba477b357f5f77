use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::{ExperimentTracker, RunRecord};

/// Posts each run as JSON to `<base_url>/api/runs`.
#[derive(Debug, Clone)]
pub struct HttpTracker {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpTracker {
    /// Creates a tracker for the service rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/api/runs", base_url.trim_end_matches('/')),
            token: None,
        }
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Full URL runs are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExperimentTracker for HttpTracker {
    async fn log_run(&self, run: RunRecord) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(&run);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("posting run {} to {}", run.run_id, self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("tracking service rejected run {}: {status} {body}", run.run_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use parking_lot::Mutex;
    use tokio::{net::TcpListener, runtime::Runtime};

    use super::*;

    type Received = Arc<Mutex<Vec<(Option<String>, RunRecord)>>>;

    async fn accept(
        State(received): State<Received>,
        headers: HeaderMap,
        Json(run): Json<RunRecord>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        received.lock().push((auth, run));
        StatusCode::CREATED
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[test]
    fn posts_run_with_token() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let received: Received = Arc::default();
            let router = Router::new()
                .route("/api/runs", post(accept))
                .with_state(received.clone());
            let base = serve(router).await;
            let tracker = HttpTracker::new(&base).with_token("secret");
            assert!(tracker.endpoint().ends_with("/api/runs"));
            tracker
                .log_run(RunRecord::new("wine-quality").metric("r2", 0.35))
                .await
                .unwrap();
            let received = received.lock();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].0.as_deref(), Some("Bearer secret"));
            assert_eq!(received[0].1.experiment, "wine-quality");
        });
    }

    #[test]
    fn non_success_status_is_an_error() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let router = Router::new().route(
                "/api/runs",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
            );
            let base = serve(router).await;
            let err = HttpTracker::new(&base)
                .log_run(RunRecord::new("wine-quality"))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("503"));
        });
    }
}
