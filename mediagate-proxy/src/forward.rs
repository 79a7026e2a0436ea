//! Transparent forwarding and WebSocket tunneling

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use axum::extract::{FromRequestParts, WebSocketUpgrade};
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as TgMessage;

use super::ProxyState;

/// Hop-by-hop headers never forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[must_use]
pub fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

#[must_use]
pub fn parse_query(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

/// Forward a plain HTTP request to the real server, streaming the body both
/// ways and appending the server API key.
pub async fn forward(state: Arc<ProxyState>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();

    let path = parts.uri.path();
    let mut target = format!("{}{}", state.emby_base_url, path);
    match parts.uri.query() {
        Some(q) => target.push_str(&format!("?{q}&api_key={}", state.emby_api_key)),
        None => target.push_str(&format!("?api_key={}", state.emby_api_key)),
    }

    let method = match reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };

    let mut upstream = state.http.request(method, &target);
    for (name, value) in &parts.headers {
        let lowered = name.as_str().to_lowercase();
        if HOP_BY_HOP.contains(&lowered.as_str())
            || lowered == "host"
            || lowered == "accept-encoding"
            || lowered == "content-length"
        {
            continue;
        }
        if let Ok(v) = value.to_str() {
            upstream = upstream.header(name.as_str(), v);
        }
    }
    upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let resp = match upstream.send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "upstream forward failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status =
        StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in resp.headers() {
        let lowered = name.as_str().to_lowercase();
        if HOP_BY_HOP.contains(&lowered.as_str())
            || lowered == "content-length"
            || lowered == "content-encoding"
        {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    builder
        .body(Body::from_stream(resp.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Bidirectional WebSocket tunnel; runs until either side closes.
pub async fn tunnel_websocket(state: Arc<ProxyState>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let (mut parts, _body) = req.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(e) => return e.into_response(),
    };

    let ws_scheme = if state.emby_base_url.starts_with("https") {
        "wss"
    } else {
        "ws"
    };
    let host = state
        .emby_base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let target = match &query {
        Some(q) => format!("{ws_scheme}://{host}{path}?{q}"),
        None => format!("{ws_scheme}://{host}{path}"),
    };

    upgrade.on_upgrade(move |client| async move {
        let (server, _) = match tokio_tungstenite::connect_async(&target).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(target, error = %e, "upstream websocket connect failed");
                return;
            }
        };
        pump(client, server).await;
    })
}

async fn pump(
    client: WebSocket,
    server: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut server_tx, mut server_rx) = server.split();

    let to_server = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let translated = match message {
                AxumMessage::Text(text) => TgMessage::Text(text.as_str().to_owned()),
                AxumMessage::Binary(data) => TgMessage::Binary(data.to_vec()),
                AxumMessage::Ping(data) => TgMessage::Ping(data.to_vec()),
                AxumMessage::Pong(data) => TgMessage::Pong(data.to_vec()),
                AxumMessage::Close(_) => break,
            };
            if server_tx.send(translated).await.is_err() {
                break;
            }
        }
        let _ = server_tx.close().await;
    };

    let to_client = async {
        while let Some(Ok(message)) = server_rx.next().await {
            let translated = match message {
                TgMessage::Text(text) => AxumMessage::Text(text.into()),
                TgMessage::Binary(data) => AxumMessage::Binary(data.into()),
                TgMessage::Ping(data) => AxumMessage::Ping(data.into()),
                TgMessage::Pong(data) => AxumMessage::Pong(data.into()),
                TgMessage::Close(_) => break,
                TgMessage::Frame(_) => continue,
            };
            if client_tx.send(translated).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    // Either direction ending tears the tunnel down.
    tokio::select! {
        () = to_server => {}
        () = to_client => {}
    }
}

/// Hydrate full item documents for an ordered ID list, preserving that
/// order, in batches of up to 200 under a GET.
pub async fn fetch_items_preserving_order(
    state: &ProxyState,
    user_id: &str,
    ids: &[String],
    fields: &str,
) -> Vec<serde_json::Value> {
    let mut by_id: HashMap<String, serde_json::Value> = HashMap::new();
    for chunk in ids.chunks(200) {
        let url = format!("{}/emby/Users/{user_id}/Items", state.emby_base_url);
        let resp = state
            .http
            .get(&url)
            .query(&[
                ("api_key", state.emby_api_key.as_str()),
                ("Ids", &chunk.join(",")),
                ("Fields", fields),
            ])
            .send()
            .await;
        let Ok(resp) = resp else { continue };
        let Ok(body) = resp.json::<serde_json::Value>().await else {
            continue;
        };
        if let Some(items) = body.get("Items").and_then(|v| v.as_array()) {
            for item in items {
                if let Some(id) = item.get("Id").and_then(|v| v.as_str()) {
                    by_id.insert(id.to_string(), item.clone());
                }
            }
        }
    }
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_websocket() {
        let mut headers = HeaderMap::new();
        assert!(!wants_websocket(&headers));
        headers.insert("upgrade", "websocket".parse().expect("value"));
        assert!(wants_websocket(&headers));
        headers.insert("upgrade", "WebSocket".parse().expect("value"));
        assert!(wants_websocket(&headers));
        headers.insert("upgrade", "h2c".parse().expect("value"));
        assert!(!wants_websocket(&headers));
    }

    #[test]
    fn test_parse_query() {
        let uri: Uri = "/emby/Users/u1/Items?ParentId=-900007&Limit=50"
            .parse()
            .expect("uri");
        let query = parse_query(&uri);
        assert_eq!(query.get("ParentId").map(String::as_str), Some("-900007"));
        assert_eq!(query.get("Limit").map(String::as_str), Some("50"));
    }

    #[test]
    fn test_hop_by_hop_list() {
        assert!(HOP_BY_HOP.contains(&"transfer-encoding"));
        assert!(HOP_BY_HOP.contains(&"upgrade"));
        assert!(!HOP_BY_HOP.contains(&"content-type"));
    }
}
