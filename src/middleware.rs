/// HTTP middleware attaching the caller's STUN info to each request
use crate::{
    cache::ResolutionRecord,
    identity::{AuthenticatedPrincipal, CallerContext},
    metrics,
    resolver::StunResolver,
};
use axum::{
    extract::{Request, State},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// STUN info as seen by request handlers
///
/// All fields are `None` when resolution failed for this request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StunInfo {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub nat_type: Option<String>,
}

impl From<ResolutionRecord> for StunInfo {
    fn from(record: ResolutionRecord) -> Self {
        Self {
            ip: Some(record.ip),
            port: Some(record.port),
            nat_type: Some(record.nat_type),
        }
    }
}

/// Resolve STUN info for the caller and add it to request extensions
///
/// The caller identity comes from an `AuthenticatedPrincipal` extension set by
/// upstream auth, falling back to the machine identity. Resolution failures
/// never fail the request.
pub async fn attach_stun_info(
    State(resolver): State<Arc<StunResolver>>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = CallerContext::from(req.extensions().get::<AuthenticatedPrincipal>());

    let info = match resolver.resolve(&caller).await {
        Ok(record) => StunInfo::from(record),
        Err(e) => {
            warn!("Continuing without STUN info: {}", e);
            metrics::record_middleware_degraded("resolution");
            StunInfo::default()
        }
    };

    req.extensions_mut().insert(info);
    next.run(req).await
}

/// Report the STUN info attached to this request
pub async fn stun_info(Extension(info): Extension<StunInfo>) -> Json<StunInfo> {
    Json(info)
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> String {
    metrics::render_metrics()
}

/// Routes exposing `/stun-info` (resolved per request) and `/metrics`
pub fn router(resolver: Arc<StunResolver>) -> Router {
    Router::new()
        .route("/stun-info", get(stun_info))
        .route_layer(from_fn_with_state(resolver, attach_stun_info))
        .route("/metrics", get(metrics_endpoint))
}
