// MediaGate provider clients
//
// Pure HTTP client implementations for the external collaborators:
// - Library Server (Emby-compatible catalog server)
// - Metadata Provider (TMDb-compatible film/TV database)
// - Cultural Provider (Douban-compatible localized cast database)
// - Downloader (MoviePilot-compatible subscription service)
// - AI Provider (OpenAI-compatible chat completions + embeddings)
//
// Every client carries a configurable timeout and a product user-agent and
// reports failures through the shared `ProviderError` taxonomy.

pub mod error;
pub mod http;

pub mod ai;
pub mod douban;
pub mod emby;
pub mod moviepilot;
pub mod tmdb;

pub use ai::AiClient;
pub use douban::DoubanClient;
pub use emby::EmbyClient;
pub use error::ProviderError;
pub use moviepilot::MoviePilotClient;
pub use tmdb::TmdbClient;
