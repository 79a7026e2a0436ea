pub mod actor;
pub mod cleanup;
pub mod collection;
pub mod media;
pub mod person;
pub mod template;
pub mod user;
pub mod watchlist;

pub use actor::{ActorSubscription, SubscriptionFilter, TrackedMedia, TrackedStatus};
pub use cleanup::{CleanupTask, MediaVersion};
pub use collection::{
    CollectionDefinition, CollectionKind, CustomCollection, GeneratedItem, Rule, RuleLogic,
};
pub use media::{
    AssetDetail, ItemType, MediaMetadata, PersonRef, SubscriptionSource, SubscriptionStatus,
};
pub use person::{PersonIdentity, TranslationEntry};
pub use template::{Invitation, InvitationStatus, UserTemplate};
pub use user::{ActiveSession, LibraryUser, UserMediaState};
pub use watchlist::{NextEpisode, WatchlistEntry, WatchlistStatus};
