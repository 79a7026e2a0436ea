//! Cultural Provider (Douban-compatible) client

pub mod client;
pub mod types;

pub use client::DoubanClient;
pub use types::{CelebrityDetails, CulturalActor};
