//! HTTP surface
//!
//! | Route | Handler |
//! |---|---|
//! | `POST /stream/receiver/{id}` | one-shot peer-connection negotiation |
//! | `GET /stream/codec/{id}` | track kinds a peer connection would carry |
//! | `GET /stream/list` | known streams |
//! | `GET /stream/stats` | hub counters |
//! | `GET /ws?url={id}` | signaling channel |
//!
//! Every route allows any origin; preflight requests are answered by the
//! CORS layer with an empty body.

pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::AppState;

pub use error::ApiError;

/// Build the router for `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream/receiver/{id}", post(handlers::receiver))
        .route("/stream/codec/{id}", get(handlers::codec))
        .route("/stream/list", get(handlers::list))
        .route("/stream/stats", get(handlers::stats))
        .route("/ws", get(handlers::signaling))
        .fallback(handlers::fallback)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
