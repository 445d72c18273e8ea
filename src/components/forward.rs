//! Replay a delivery to another URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use super::{
    required_field, required_param, Component, ComponentSettings, ConfigError, Params,
    ProcessError,
};
use crate::hooks::{Hook, Request};
use crate::store::Partition;

/// Headers owned by the transport or the hop; never replayed.
const HOP_HEADERS: &[&str] = &["Connection", "Host", "Content-Length", "Transfer-Encoding"];

pub struct ForwardRequestAction {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
}

impl ForwardRequestAction {
    pub const NAME: &'static str = "forward-request-action";

    pub fn new(settings: &ComponentSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: settings.forward_timeout,
            user_agent: settings.user_agent.clone(),
        }
    }
}

#[async_trait]
impl Component for ForwardRequestAction {
    fn display_name(&self) -> &str {
        "Forward request"
    }

    fn config_template(&self) -> Option<&str> {
        Some("request-forward-action")
    }

    fn config_fields(&self) -> &'static [&'static str] {
        &["url"]
    }

    async fn init(
        &self,
        _hook: &Hook,
        params: &Params,
        partition: &Partition<'_>,
    ) -> Result<(), ConfigError> {
        let raw = required_param(params, "url")?;
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::invalid("url", format!("is not valid: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "url",
                format!("unsupported scheme {:?}", url.scheme()),
            ));
        }
        partition.set_field("url", raw).await?;
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        partition: &Partition<'_>,
    ) -> Result<(), ProcessError> {
        let url = required_field(partition, "url").await?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ProcessError::rejected(format!("invalid method {:?}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(self.timeout)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            if HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            let name = if name == "User-Agent" {
                "X-Forwarded-User-Agent"
            } else {
                name.as_str()
            };
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => warn!(target: "components", hook = %hook.id, header = name, "skipping unforwardable header"),
            }
        }
        builder = builder.header(reqwest::header::USER_AGENT, self.user_agent.as_str());

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProcessError::Timeout(self.timeout)
            } else {
                ProcessError::Upstream(format!("request forward error: {e}"))
            }
        })?;

        let status = response.status();
        if status.as_u16() >= 300 {
            return Err(ProcessError::Upstream(format!(
                "request forward unexpected status code received: {}",
                status.as_u16()
            )));
        }
        debug!(target: "components", hook = %hook.id, status = status.as_u16(), "request forwarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::{open_store, params, write_tx};
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::any;
    use axum::Router;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct Captured {
        method: String,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    type Capture = Arc<Mutex<Option<Captured>>>;

    async fn capture_handler(
        State((capture, status)): State<(Capture, StatusCode)>,
        method: axum::http::Method,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> StatusCode {
        *capture.lock() = Some(Captured {
            method: method.to_string(),
            headers,
            body: body.to_vec(),
        });
        status
    }

    async fn spawn_capture_server(status: StatusCode) -> (String, Capture) {
        let capture: Capture = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route("/capture", any(capture_handler))
            .with_state((capture.clone(), status));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/capture"), capture)
    }

    #[tokio::test]
    async fn test_forward_strips_connection_and_renames_user_agent() {
        let (url, capture) = spawn_capture_server(StatusCode::OK).await;
        let (store, _dir) = open_store().await;
        let hook = Hook::new("fwd");
        let action = ForwardRequestAction::new(&ComponentSettings::default());

        let tx = write_tx(&store).await;
        let partition = tx.partition(ForwardRequestAction::NAME, "fwd");
        action
            .init(&hook, &params(&[("url", &url)]), &partition)
            .await
            .unwrap();

        let request = Request::new("PUT", "hello")
            .with_header("Connection", "keep-alive")
            .with_header("User-Agent", "GitHub-Hookshot/abc")
            .with_header("X-Custom", "value");
        action.process(&hook, &request, &partition).await.unwrap();

        let captured = capture.lock().clone().expect("request captured");
        assert_eq!(captured.method, "PUT");
        assert_eq!(captured.body, b"hello");
        assert_eq!(captured.headers["x-custom"], "value");
        assert_eq!(
            captured.headers["x-forwarded-user-agent"],
            "GitHub-Hookshot/abc"
        );
        assert_eq!(
            captured.headers["user-agent"],
            crate::components::DEFAULT_USER_AGENT
        );
        // The hop header from the inbound request is not replayed.
        assert_ne!(
            captured
                .headers
                .get("connection")
                .and_then(|v| v.to_str().ok()),
            Some("keep-alive")
        );
    }

    #[tokio::test]
    async fn test_forward_fails_on_error_status() {
        let (url, _capture) = spawn_capture_server(StatusCode::BAD_GATEWAY).await;
        let (store, _dir) = open_store().await;
        let hook = Hook::new("fwd");
        let action = ForwardRequestAction::new(&ComponentSettings::default());

        let tx = write_tx(&store).await;
        let partition = tx.partition(ForwardRequestAction::NAME, "fwd");
        action
            .init(&hook, &params(&[("url", &url)]), &partition)
            .await
            .unwrap();

        let err = action
            .process(&hook, &Request::new("POST", "x"), &partition)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Upstream(_)));
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_forward_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (store, _dir) = open_store().await;
        let hook = Hook::new("fwd");
        let action = ForwardRequestAction::new(&ComponentSettings::default());
        let tx = write_tx(&store).await;
        let partition = tx.partition(ForwardRequestAction::NAME, "fwd");
        action
            .init(&hook, &params(&[("url", &format!("http://{addr}/"))]), &partition)
            .await
            .unwrap();

        let err = action
            .process(&hook, &Request::new("POST", "x"), &partition)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_init_rejects_bad_urls() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("fwd");
        let action = ForwardRequestAction::new(&ComponentSettings::default());
        let tx = write_tx(&store).await;
        let partition = tx.partition(ForwardRequestAction::NAME, "fwd");

        for bad in ["not a url", "ftp://example.com/x", "/relative"] {
            let err = action
                .init(&hook, &params(&[("url", bad)]), &partition)
                .await
                .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { field: "url", .. }), "{bad}");
        }
        assert!(matches!(
            action.init(&hook, &Params::new(), &partition).await,
            Err(ConfigError::Missing("url"))
        ));
    }
}
