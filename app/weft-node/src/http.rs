//! HTTP listener: mutual-TLS accept loop, router, bearer-auth middleware

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};
use weft_registry::RegistryClient;
use weft_token::{TokenStatus, TokenVerifier};

use crate::error::NodeError;
use crate::{NODE_NAME, NODE_VERSION};

/// Shared state behind the HTTP routes
#[derive(Clone)]
pub struct AppState {
    /// Node service name
    pub service: String,
    /// Token verifier enforcing the authorization header
    pub verifier: Arc<TokenVerifier>,
    /// Registry mirror for status reporting
    pub registry: Arc<RegistryClient>,
}

/// Build the node's router: an open health route and a token-protected
/// status route
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/status", get(status_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_token,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.service,
        "node": NODE_NAME,
        "version": NODE_VERSION,
    }))
}

async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.registry.stats();
    let verifier = state.verifier.stats();
    Json(serde_json::json!({
        "service": state.service,
        "registry": {
            "services": registry.services,
            "events_applied": registry.events_applied,
            "reconnects": registry.reconnects,
        },
        "tokens": {
            "checked": verifier.checked,
            "accepted": verifier.accepted,
            "rejected": verifier.rejected,
        },
    }))
}

/// Authorization middleware for protected routes
async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(header) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::UNAUTHORIZED, "missing authorization header").into_response();
    };

    match state.verifier.authorize(header).await {
        TokenStatus::Valid => next.run(request).await,
        status => {
            debug!(%status, "rejected http request");
            (StatusCode::UNAUTHORIZED, status.to_string()).into_response()
        }
    }
}

/// Serve the router over a mutual-TLS accept loop until the shutdown flag
/// flips
pub async fn serve_http(
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), NodeError> {
    let addr = listener.local_addr()?;
    let acceptor = TlsAcceptor::from(tls);
    info!(%addr, "starting HTTP listener");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "http accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let app = app.clone();

                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            debug!(%peer, error = %e, "tls handshake failed");
                            return;
                        }
                    };

                    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        app.clone().oneshot(request)
                    });

                    if let Err(e) = ConnectionBuilder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "http connection error");
                    }
                });
            }
        }
    }

    info!(%addr, "HTTP listener stopped");
    Ok(())
}
