//! Management API and webhook ingestion pipeline

pub mod http;
pub mod state;
pub mod webhook;

pub use state::AppState;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

/// Build the `/api/*` + webhook router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook/emby", post(webhook::handle_webhook))
        .nest("/api", api_router())
        .with_state(state)
}

fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Task control
        .route("/status", get(http::tasks::status))
        .route("/trigger_stop_task", post(http::tasks::trigger_stop))
        .route("/actions/{task_key}", post(http::tasks::trigger_task))
        // Custom collections
        .route(
            "/custom_collections",
            get(http::collections::list).post(http::collections::create),
        )
        .route(
            "/custom_collections/{id}",
            get(http::collections::detail)
                .put(http::collections::update)
                .delete(http::collections::remove),
        )
        .route("/custom_collections/{id}/sync", post(http::collections::sync))
        .route(
            "/custom_collections/{id}/status",
            post(http::collections::set_status),
        )
        .route(
            "/custom_collections/{id}/media_status",
            post(http::collections::override_media_status),
        )
        .route(
            "/custom_collections/{id}/correct_match",
            post(http::collections::correct_match),
        )
        // Watchlist
        .route("/watchlist", get(http::watchlist::list))
        .route("/watchlist/{series_id}", delete(http::watchlist::remove))
        .route("/watchlist/{series_id}/force_end", post(http::watchlist::force_end))
        .route(
            "/watchlist/{series_id}/subscribe_gaps",
            post(http::watchlist::subscribe_gaps),
        )
        .route(
            "/watchlist/{series_id}/subscribe_season",
            post(http::watchlist::subscribe_season),
        )
        .route("/watchlist/batch/resubscribe", post(http::watchlist::batch_resubscribe))
        // Actor subscriptions
        .route(
            "/actor_subscriptions",
            get(http::actors::list).post(http::actors::create),
        )
        .route(
            "/actor_subscriptions/{id}",
            get(http::actors::detail).delete(http::actors::remove),
        )
        .route("/actor_subscriptions/{id}/refresh", post(http::actors::refresh))
        .route(
            "/actor_subscriptions/{id}/tracked/{tmdb_id}/status",
            post(http::actors::override_tracked),
        )
        .route(
            "/actor_subscriptions/{id}/tracked/{tmdb_id}/subscribe",
            post(http::actors::subscribe_tracked),
        )
        // Maintenance
        .route("/review_queue", get(http::maintenance::review_queue))
        .route(
            "/review_queue/{item_id}/reprocess",
            post(http::maintenance::reprocess_review_item),
        )
        .route("/review_queue/clear", post(http::maintenance::clear_review_queue))
        .route("/database/export", get(http::maintenance::export_tables))
        .route("/database/import", post(http::maintenance::import_tables))
        .route(
            "/database/clear/{table}",
            post(http::maintenance::clear_table),
        )
        .route(
            "/database/correct_sequences",
            post(http::maintenance::correct_sequences),
        )
        .route("/templates", get(http::templates::list).post(http::templates::create))
        .route("/templates/{id}/sync", post(http::templates::sync))
        .route("/invitations", post(http::templates::create_invitation))
        .route("/invitations/{token}/redeem", post(http::templates::redeem))
}
