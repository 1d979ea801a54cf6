//! # Control Server
//!
//! A small `axum` server through which the collaborators that would
//! normally live on the device (a settings screen, a push listener) deliver
//! their events:
//!
//! - `POST /events` applies a start/configure command.
//! - `POST /push` handles a push data message.
//! - `POST /token` registers a refreshed push token.
//! - `GET /status` reports the scheduler state and effective flags.
//!
//! The server stops when the shutdown signal fires.

use crate::config::ConfigEvent;
use crate::scheduler::SchedulerState;
use crate::service::{PushMessage, Service};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub registered: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerState,
    pub ticks_completed: u64,
    pub location_active: bool,
    pub webhook_enabled: bool,
    pub api_enabled: bool,
    pub periodic_enabled: bool,
    pub interval_seconds: u64,
}

async fn post_event(State(service): State<Arc<Service>>, Json(event): Json<ConfigEvent>) -> StatusCode {
    service.handle_event(&event).await;
    StatusCode::ACCEPTED
}

async fn post_push(State(service): State<Arc<Service>>, Json(message): Json<PushMessage>) -> StatusCode {
    if service.handle_push(&message).await {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn post_token(
    State(service): State<Arc<Service>>,
    Json(request): Json<TokenRequest>,
) -> Json<TokenResponse> {
    let registered = service.register_push_token(&request.token).await;
    Json(TokenResponse { registered })
}

async fn get_status(State(service): State<Arc<Service>>) -> Json<StatusResponse> {
    let config = service.dispatch_config();
    Json(StatusResponse {
        scheduler: service.state(),
        ticks_completed: service.ticks_completed(),
        location_active: service.location_active(),
        webhook_enabled: config.webhook_target().is_some(),
        api_enabled: config.api_target().is_some(),
        periodic_enabled: config.enable_periodic,
        interval_seconds: config.interval_seconds,
    })
}

/// The routes, without a listener. Useful for embedding.
pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/events", post(post_event))
        .route("/push", post(post_push))
        .route("/token", post(post_token))
        .route("/status", get(get_status))
        .with_state(service)
}

pub struct ControlServer {
    listener: TcpListener,
    service: Arc<Service>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ControlServer {
    /// Binds the listener; the server does not serve until [`run`](Self::run).
    pub async fn bind(
        addr: SocketAddr,
        service: Arc<Service>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            service,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a future that serves until a shutdown signal is received.
    pub fn run(mut self) -> impl Future<Output = ()> {
        let app = router(self.service.clone());

        async move {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    trace!("Control server received shutdown signal.");
                }
                result = axum::serve(self.listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!(error = %e, "Control server error");
                    }
                }
            }
            trace!("Control server task finished.");
        }
    }
}
