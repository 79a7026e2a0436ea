pub mod actor_subscription;
pub mod cast;
pub mod cleanup;
pub mod collections;
pub mod cover;
pub mod list_importer;
pub mod metadata;
pub mod quota;
pub mod recommendation;
pub mod template;
pub mod translation;
pub mod watchlist;

pub use actor_subscription::ActorSubscriptionProcessor;
pub use cleanup::CleanupScanner;
pub use collections::{CollectionService, FilterEngine};
pub use cover::CoverGenerator;
pub use list_importer::ListImporter;
pub use metadata::{MetadataProcessor, ProcessOutcome};
pub use quota::DailyQuota;
pub use recommendation::RecommendationEngine;
pub use template::TemplateService;
pub use translation::Translator;
pub use watchlist::WatchlistProcessor;
