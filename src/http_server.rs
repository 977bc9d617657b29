use crate::config::Config;
use crate::notifier::Notifier;
use crate::types::{HealthStatus, WebhookAck, WebhookRequest};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::FormRejection, State},
    routing::{get, post},
    Form, Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Read-only state shared by every handler.
#[derive(Debug, Clone)]
pub struct ServerState {
    delay_secs: i64,
    notifier: Notifier,
}

impl ServerState {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            delay_secs: config.delay_secs,
            notifier: Notifier::new(config.delay())?,
        })
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(handle_health))
        .with_state(state)
}

pub async fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP server on {addr}"))?;
    let local = listener
        .local_addr()
        .context("failed to read bound address")?;
    Ok((listener, local))
}

/// Serve until `shutdown` resolves. In-flight HTTP requests are drained;
/// delayed notifications that have not fired yet are not.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

/// Bind `config.listen_addr` and spawn the server in the background,
/// returning the bound address.
pub async fn start(config: &Config) -> Result<SocketAddr> {
    let state = ServerState::new(config)?;
    let (listener, addr) = bind(config.listen_addr).await?;
    info!(%addr, delay_secs = config.delay_secs, "webhook relay listening");

    tokio::spawn(async move {
        if let Err(e) = serve(listener, state, std::future::pending::<()>()).await {
            error!("{e:#}");
        }
    });

    Ok(addr)
}

async fn handle_webhook(
    State(state): State<ServerState>,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Json<WebhookAck> {
    // Unreadable bodies are treated as if both fields were absent.
    let request = match form {
        Ok(Form(pairs)) => WebhookRequest::from_form_pairs(pairs),
        Err(rejection) => {
            debug!(%rejection, "could not decode webhook form body");
            WebhookRequest::default()
        }
    };

    info!(
        update_callback = request.update_callback(),
        description = request.description(),
        structured_field = request.structured_field,
        delay = state.delay_secs,
        "received webhook"
    );

    state.notifier.schedule(request);

    Json(WebhookAck {
        message: "Webhook received".to_string(),
        delay: state.delay_secs,
    })
}

async fn handle_health(State(state): State<ServerState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "OK".to_string(),
        delay: state.delay_secs,
    })
}
