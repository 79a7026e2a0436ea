//! Synthetic Views injection
//!
//! The Views response is rebuilt from scratch: the user's native views
//! (filtered by the configured selection) merged with one synthetic
//! CollectionFolder per active custom collection visible to the user, in
//! the configured order.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use mediagate_core::models::CustomCollection;

use super::mimic::to_mimicked_id;
use super::ProxyState;

pub async fn handle_views(state: &ProxyState, user_id: &str) -> Response {
    let native = match fetch_native_views(state, user_id).await {
        Ok(views) => views,
        Err(e) => {
            tracing::error!(error = %e, "native views fetch failed");
            Vec::new()
        }
    };

    let collections = match state.collections.all_active().await {
        Ok(collections) => collections,
        Err(e) => {
            tracing::error!(error = %e, "collection listing failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let now = chrono::Utc::now().timestamp();
    let synthetic: Vec<Value> = collections
        .iter()
        .filter(|coll| coll.emby_collection_id.is_some())
        .filter(|coll| coll.visible_to(user_id))
        .map(|coll| synthetic_view(coll, &state.server_id, now))
        .collect();

    let native = if state.config.merge_native_libraries {
        if state.config.native_view_selection.is_empty() {
            native
        } else {
            native
                .into_iter()
                .filter(|view| {
                    view.get("Id")
                        .and_then(Value::as_str)
                        .is_some_and(|id| {
                            state
                                .config
                                .native_view_selection
                                .iter()
                                .any(|keep| keep == id)
                        })
                })
                .collect()
        }
    } else {
        Vec::new()
    };

    let mut items = Vec::with_capacity(native.len() + synthetic.len());
    if state.config.native_view_order == "after" {
        items.extend(synthetic);
        items.extend(native);
    } else {
        items.extend(native);
        items.extend(synthetic);
    }

    let total = items.len();
    Json(json!({ "Items": items, "TotalRecordCount": total })).into_response()
}

async fn fetch_native_views(state: &ProxyState, user_id: &str) -> anyhow::Result<Vec<Value>> {
    let url = format!("{}/emby/Users/{user_id}/Views", state.emby_base_url);
    let body: Value = state
        .http
        .get(&url)
        .query(&[("api_key", state.emby_api_key.as_str())])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(body
        .get("Items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

/// Shape one collection as a CollectionFolder view. The primary image tag
/// carries the real collection ID with a timestamp suffix to defeat client
/// image caches.
fn synthetic_view(coll: &CustomCollection, server_id: &str, now: i64) -> Value {
    let mimicked_id = to_mimicked_id(coll.id);
    let real_collection_id = coll.emby_collection_id.clone().unwrap_or_default();
    json!({
        "Name": coll.name,
        "ServerId": server_id,
        "Id": mimicked_id,
        "Guid": uuid::Uuid::new_v4().to_string(),
        "Etag": format!("{}{}", coll.id, now),
        "DateCreated": "2025-01-01T00:00:00.0000000Z",
        "CanDelete": false,
        "CanDownload": false,
        "SortName": coll.name,
        "ExternalUrls": [],
        "ProviderIds": {},
        "IsFolder": true,
        "ParentId": "2",
        "Type": "CollectionFolder",
        "PresentationUniqueKey": uuid::Uuid::new_v4().to_string(),
        "DisplayPreferencesId": format!("custom-{}", coll.id),
        "ForcedSortName": coll.name,
        "Taglines": [],
        "RemoteTrailers": [],
        "UserData": {"PlaybackPositionTicks": 0, "IsFavorite": false, "Played": false},
        "ChildCount": coll.in_library_count.max(1),
        "PrimaryImageAspectRatio": 1.777_777_777_777_777_7,
        "CollectionType": coll.definition.collection_type(),
        "ImageTags": {"Primary": format!("{real_collection_id}?timestamp={now}")},
        "BackdropImageTags": [],
        "LockedFields": [],
        "LockData": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediagate_core::models::{CollectionDefinition, CollectionKind, ItemType};

    fn collection(id: i64, types: Vec<ItemType>) -> CustomCollection {
        CustomCollection {
            id,
            name: format!("合集{id}"),
            kind: CollectionKind::List,
            definition: CollectionDefinition {
                item_type: types,
                ..Default::default()
            },
            status: "active".into(),
            sort_order: 0,
            allowed_user_ids: None,
            emby_collection_id: Some("real-42".into()),
            in_library_count: 7,
            generated_media_info: vec![],
            last_synced_at: None,
        }
    }

    #[test]
    fn test_synthetic_view_shape() {
        let coll = collection(7, vec![ItemType::Movie]);
        let view = synthetic_view(&coll, "srv1", 1_700_000_000);
        assert_eq!(view["Id"], "-900007");
        assert_eq!(view["Type"], "CollectionFolder");
        assert_eq!(view["CollectionType"], "movies");
        assert_eq!(view["ServerId"], "srv1");
        assert_eq!(view["ChildCount"], 7);
        let tag = view["ImageTags"]["Primary"].as_str().expect("tag");
        assert!(tag.starts_with("real-42?timestamp="));
    }

    #[test]
    fn test_synthetic_view_mixed_type() {
        let coll = collection(8, vec![ItemType::Movie, ItemType::Series]);
        let view = synthetic_view(&coll, "srv1", 0);
        assert_eq!(view["CollectionType"], "mixed");

        let tv = collection(9, vec![ItemType::Series]);
        let view = synthetic_view(&tv, "srv1", 0);
        assert_eq!(view["CollectionType"], "tvshows");
    }
}
