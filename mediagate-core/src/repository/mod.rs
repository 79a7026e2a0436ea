pub mod cleanup;
pub mod collection;
pub mod log;
pub mod media;
pub mod person;
pub mod query;
pub mod template;
pub mod user;
pub mod watchlist;

pub use cleanup::CleanupRepository;
pub use collection::CollectionRepository;
pub use log::LogRepository;
pub use media::MediaRepository;
pub use person::PersonRepository;
pub use query::{VirtualLibraryQuery, VirtualQueryOptions};
pub use template::TemplateRepository;
pub use user::UserRepository;
pub use watchlist::WatchlistRepository;
