//! Downloader (MoviePilot-compatible) client

pub mod client;

pub use client::{MoviePilotClient, SubscribeRequest};
