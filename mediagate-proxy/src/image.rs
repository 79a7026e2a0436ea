//! Synthetic view primary image
//!
//! The image tag planted by the Views rewrite carries the real collection
//! ID (suffixed with a cache-busting timestamp); the proxy forwards the
//! request to that real ID.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::ProxyState;

pub async fn handle_mimicked_image(
    state: &ProxyState,
    query: &HashMap<String, String>,
) -> Response {
    let Some(tag) = query.get("tag").or_else(|| query.get("Tag")) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(real_collection_id) = real_id_from_tag(tag) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let url = format!(
        "{}/emby/Items/{real_collection_id}/Images/Primary",
        state.emby_base_url
    );
    let resp = match state
        .http
        .get(&url)
        .query(&[("api_key", state.emby_api_key.as_str())])
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(error = %e, "collection image fetch failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status =
        StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = resp.headers().get("content-type") {
        builder = builder.header("content-type", content_type.as_bytes());
    }
    builder
        .body(Body::from_stream(resp.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// The tag is `"{real_id}?timestamp={unix}"`; everything after `?` is cache
/// busting only.
fn real_id_from_tag(tag: &str) -> Option<String> {
    let id = tag.split('?').next().unwrap_or_default();
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_id_from_tag() {
        assert_eq!(
            real_id_from_tag("real-42?timestamp=1700000000"),
            Some("real-42".to_string())
        );
        assert_eq!(real_id_from_tag("real-42"), Some("real-42".to_string()));
        assert_eq!(real_id_from_tag(""), None);
        assert_eq!(real_id_from_tag("?timestamp=1"), None);
    }
}
