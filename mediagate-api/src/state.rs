//! Shared application state for the API surface and webhook pipeline

use std::sync::Arc;

use mediagate_core::config::Config;
use mediagate_core::repository::{
    CollectionRepository, LogRepository, MediaRepository, UserRepository,
};
use mediagate_core::service::template::PolicyPushMarkers;
use mediagate_core::service::{
    ActorSubscriptionProcessor, CleanupScanner, CollectionService, DailyQuota, MetadataProcessor,
    RecommendationEngine, TemplateService, WatchlistProcessor,
};
use mediagate_core::task::{TaskQueue, TaskRegistry};
use mediagate_providers::emby::EmbyClient;
use mediagate_providers::moviepilot::MoviePilotClient;

use crate::webhook::WebhookState;

pub struct AppState {
    pub config: Config,
    pub queue: TaskQueue,
    pub registry: Arc<TaskRegistry>,
    pub emby: Arc<EmbyClient>,
    pub metadata: Arc<MetadataProcessor>,
    pub watchlist: Arc<WatchlistProcessor>,
    pub actors: Arc<ActorSubscriptionProcessor>,
    pub collections: Arc<CollectionService>,
    pub cleanup: Arc<CleanupScanner>,
    pub templates: Arc<TemplateService>,
    pub recommender: Arc<RecommendationEngine>,
    pub downloader: Option<Arc<MoviePilotClient>>,
    pub quota: Arc<DailyQuota>,
    pub markers: PolicyPushMarkers,
    pub media_repo: MediaRepository,
    pub user_repo: UserRepository,
    pub log_repo: LogRepository,
    pub collection_repo: CollectionRepository,
    pub webhook: WebhookState,
    /// The database's server identity, compared on import to pick
    /// overwrite-vs-share semantics.
    pub server_id: String,
}
