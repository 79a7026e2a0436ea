//! Metadata Provider (TMDb-compatible) client

pub mod client;
pub mod types;

pub use client::TmdbClient;
pub use types::{
    CombinedCredits, CreditEntry, Credits, EpisodeSummary, FilmographyEntry, Genre, ListPage,
    MovieDetails, PagedResponse, PersonDetails, SearchResult, SeasonDetails, SeasonSummary,
    TvDetails,
};
