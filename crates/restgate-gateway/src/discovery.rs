//! Root resource discovery under `/.well-known`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;

/// Link relation advertised for the API root.
const LINK_REL: &str = "restconf";

/// Stateless responder pointing clients at the API mount path.
#[derive(Debug, Clone)]
pub struct RootDiscoveryEndpoint {
    context_path: Arc<str>,
}

impl RootDiscoveryEndpoint {
    /// Path prefix the endpoint is mounted at.
    pub const MOUNT_PATH: &'static str = "/.well-known";

    pub fn new(context_path: &str) -> Self {
        Self {
            context_path: Arc::from(context_path),
        }
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// XRD document as served at `host-meta`.
    pub fn xrd(&self) -> String {
        format!(
            "<?xml version='1.0' encoding='UTF-8'?>\n\
             <XRD xmlns='http://docs.oasis-open.org/ns/xri/xrd-1.0'>\n  \
             <Link rel='{LINK_REL}' href='{}'/>\n\
             </XRD>\n",
            escape_attr(&self.context_path)
        )
    }

    /// JSON document as served at `host-meta.json`.
    pub fn json(&self) -> serde_json::Value {
        json!({
            "links": {
                "rel": LINK_REL,
                "href": &*self.context_path,
            }
        })
    }

    /// Handler tree to attach at [`MOUNT_PATH`](Self::MOUNT_PATH).
    pub fn router(&self) -> Router {
        Router::new()
            .route("/host-meta", get(host_meta))
            .route("/host-meta.json", get(host_meta_json))
            .with_state(self.clone())
    }
}

async fn host_meta(State(endpoint): State<RootDiscoveryEndpoint>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/xrd+xml")],
        endpoint.xrd(),
    )
}

async fn host_meta_json(State(endpoint): State<RootDiscoveryEndpoint>) -> impl IntoResponse {
    axum::Json(endpoint.json())
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
