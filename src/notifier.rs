use crate::types::{BuildStatus, UpdatePayload, WebhookRequest};
use anyhow::{bail, Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Upper bound on a single outbound update call.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the delayed half of a webhook: evaluates the description and
/// forwards the resulting status to the caller's callback URL.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    delay: Duration,
}

/// What `notify` did with a request.
#[derive(Debug)]
pub enum Dispatch {
    /// No callback URL was supplied; nothing was sent.
    NoCallback,
    /// The update was handed to a background task. Its outcome is only logged.
    Sent(JoinHandle<()>),
    /// Something failed before the request could be dispatched.
    Failed,
}

impl Notifier {
    pub fn new(delay: Duration) -> Result<Self> {
        Self::with_timeout(delay, CALLBACK_TIMEOUT)
    }

    pub fn with_timeout(delay: Duration, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build update HTTP client")?;
        Ok(Self { client, delay })
    }

    /// Spawn a task that waits for the configured delay, then calls `notify`.
    /// The task cannot be cancelled and no handle is returned.
    pub fn schedule(&self, request: WebhookRequest) {
        let notifier = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(notifier.delay).await;
            notifier.notify(request);
        });
    }

    /// Evaluate `request` and dispatch its update immediately.
    pub fn notify(&self, request: WebhookRequest) -> Dispatch {
        match self.try_notify(&request) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                error!("error calling update callback: {e:#}");
                Dispatch::Failed
            }
        }
    }

    fn try_notify(&self, request: &WebhookRequest) -> Result<Dispatch> {
        if let Some(field) = request.structured_field {
            bail!("`{field}` must be a single string value");
        }

        let description = request.description().trim();
        let status = BuildStatus::from_description(description);
        let callback = request.update_callback();

        info!(
            delay_secs = self.delay.as_secs(),
            description,
            ends_with_period = status == BuildStatus::Pass,
            %status,
            callback,
            "delay elapsed, evaluated description"
        );

        if callback.is_empty() {
            info!("no update callback URL provided");
            return Ok(Dispatch::NoCallback);
        }

        let url = Url::parse(callback)
            .with_context(|| format!("invalid update callback URL {callback:?}"))?;
        let payload = UpdatePayload::new(status);
        info!(?payload, "sending update data");

        let handle = tokio::spawn(send_update(self.client.clone(), url, payload));
        info!("update request sent (not waiting for response)");
        Ok(Dispatch::Sent(handle))
    }
}

async fn send_update(client: Client, url: Url, payload: UpdatePayload) {
    if let Err(e) = deliver(&client, url, &payload).await {
        error!("update error: {e:#}");
    }
}

/// POST the payload once. Any status below 500 counts as delivered.
async fn deliver(client: &Client, url: Url, payload: &UpdatePayload) -> Result<()> {
    let response = client
        .post(url.clone())
        .header(CONTENT_TYPE, "application/json")
        .json(payload)
        .send()
        .await
        .with_context(|| format!("update request to {url} failed"))?;

    let status = response.status();
    if status.as_u16() >= 500 {
        bail!("update request to {url} failed with status code {status}");
    }

    let reason = status.canonical_reason().unwrap_or("");
    match response.text().await {
        Ok(body) => info!(status = status.as_u16(), reason, body, "update response"),
        Err(e) => warn!(
            status = status.as_u16(),
            reason,
            "update delivered but its response body could not be read: {e}"
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    type Recorded = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn spawn_recorder(status: StatusCode, stall: Duration) -> (String, Recorded) {
        let recorded: Recorded = Arc::default();
        let app = Router::new()
            .route(
                "/callback",
                post(
                    move |State(recorded): State<Recorded>,
                          headers: HeaderMap,
                          Json(body): Json<Value>| async move {
                        let content_type = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        recorded.lock().unwrap().push((content_type, body));
                        tokio::time::sleep(stall).await;
                        (status, "recorded")
                    },
                ),
            )
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/callback"), recorded)
    }

    fn request(callback: Option<&str>, description: Option<&str>) -> WebhookRequest {
        WebhookRequest {
            update_callback: callback.map(str::to_string),
            description: description.map(str::to_string),
            structured_field: None,
        }
    }

    async fn sent(dispatch: Dispatch) {
        match dispatch {
            Dispatch::Sent(handle) => handle.await.expect("delivery task"),
            other => panic!("expected a dispatched update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn posts_pass_payload_as_json() {
        let (url, recorded) = spawn_recorder(StatusCode::OK, Duration::ZERO).await;
        let notifier = Notifier::new(Duration::ZERO).unwrap();

        sent(notifier.notify(request(Some(&url), Some("  Build succeeded. ")))).await;

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0.as_deref(), Some("application/json"));
        assert_eq!(
            recorded[0].1,
            serde_json::json!({
                "status": "pass",
                "messages": ["Build completed with status: pass"],
            })
        );
    }

    #[tokio::test]
    async fn missing_period_fails() {
        let (url, recorded) = spawn_recorder(StatusCode::OK, Duration::ZERO).await;
        let notifier = Notifier::new(Duration::ZERO).unwrap();

        sent(notifier.notify(request(Some(&url), Some("Build failed")))).await;

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1["status"], "fail");
    }

    #[tokio::test]
    async fn empty_callback_sends_nothing() {
        let notifier = Notifier::new(Duration::ZERO).unwrap();
        assert!(matches!(
            notifier.notify(request(None, Some("Done."))),
            Dispatch::NoCallback
        ));
        assert!(matches!(
            notifier.notify(request(Some(""), None)),
            Dispatch::NoCallback
        ));
    }

    #[tokio::test]
    async fn unparseable_callback_is_contained() {
        let notifier = Notifier::new(Duration::ZERO).unwrap();
        assert!(matches!(
            notifier.notify(request(Some("not a url"), Some("Done."))),
            Dispatch::Failed
        ));
    }

    #[tokio::test]
    async fn structured_fields_are_not_forwarded() {
        let (url, recorded) = spawn_recorder(StatusCode::OK, Duration::ZERO).await;
        let notifier = Notifier::new(Duration::ZERO).unwrap();

        let nested = WebhookRequest::from_form_pairs([
            ("description[a]".to_string(), "x".to_string()),
            ("updateCallback".to_string(), url),
        ]);
        assert!(matches!(notifier.notify(nested), Dispatch::Failed));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn client_and_server_errors_are_only_logged() {
        let notifier = Notifier::new(Duration::ZERO).unwrap();
        for status in [StatusCode::NOT_FOUND, StatusCode::INTERNAL_SERVER_ERROR] {
            let (url, recorded) = spawn_recorder(status, Duration::ZERO).await;
            sent(notifier.notify(request(Some(&url), Some("Done.")))).await;
            assert_eq!(recorded.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn truncated_response_body_still_counts_as_delivered() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !String::from_utf8_lossy(&seen).contains("]}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 100\r\n\r\nshort")
                .await
                .unwrap();
        });

        let client = Client::builder().timeout(CALLBACK_TIMEOUT).build().unwrap();
        let url = Url::parse(&format!("http://{addr}/callback")).unwrap();
        let outcome = deliver(&client, url, &UpdatePayload::new(BuildStatus::Pass)).await;
        assert!(outcome.is_ok(), "{outcome:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_only_logged() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = Notifier::new(Duration::ZERO).unwrap();
        let url = format!("http://{addr}/callback");
        sent(notifier.notify(request(Some(&url), Some("Done.")))).await;
    }

    #[tokio::test]
    async fn slow_callback_times_out() {
        let (url, _recorded) = spawn_recorder(StatusCode::OK, Duration::from_secs(30)).await;
        let notifier =
            Notifier::with_timeout(Duration::ZERO, Duration::from_millis(200)).unwrap();

        let started = Instant::now();
        sent(notifier.notify(request(Some(&url), Some("Done.")))).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn schedule_waits_for_delay() {
        let (url, recorded) = spawn_recorder(StatusCode::OK, Duration::ZERO).await;
        let notifier = Notifier::new(Duration::from_millis(500)).unwrap();

        let started = Instant::now();
        notifier.schedule(request(Some(&url), Some("Done.")));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorded.lock().unwrap().is_empty());

        while recorded.lock().unwrap().is_empty() {
            assert!(started.elapsed() < Duration::from_secs(5), "update never arrived");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(recorded.lock().unwrap().len(), 1);
    }
}
