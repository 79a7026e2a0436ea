//! Library Server (Emby-compatible) client

pub mod client;
pub mod types;

pub use client::{EmbyClient, MAX_IDS_PER_REQUEST};
pub use types::{
    AuthResponse, ItemUserData, ItemsResponse, MediaItem, MediaSource, MediaStream, NamedRef,
    PersonEntry, UserDto, UserPolicy,
};
