//! The per-platform discovery adapters.
//!
//! Each adapter turns a keyword list and viewer floor into normalized
//! [`LiveStream`] records for its platform. Adapters own their platform's
//! credential lifecycle (refresh before a pass, one re-auth on a mid-scan
//! 401) and never let an error escape `scan`: a broken platform degrades to
//! mock data or a partial result, never to an aborted pass.

use async_trait::async_trait;

use crate::model::{LiveStream, Platform, Streamer};

pub mod kick;
pub mod mock;
pub mod tiktok;
pub mod twitch;
pub mod youtube;

pub use kick::KickAdapter;
pub use tiktok::TikTokAdapter;
pub use twitch::TwitchAdapter;
pub use youtube::YouTubeAdapter;

/// The uniform discovery contract one platform implements.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Human-facing name, e.g. "Twitch Scanner".
    fn label(&self) -> &str;

    /// Whether the adapter participates in scan passes.
    fn is_active(&self) -> bool;

    /// Toggles participation. Deactivating never touches stored credentials.
    fn set_active(&self, active: bool);

    /// Whether the platform currently holds a usable token.
    fn is_authenticated(&self) -> bool;

    /// Finds live streams matching `keywords` with at least `min_viewers`
    /// watchers. Results are deduplicated by `(platform, username)` and each
    /// carries the keyword it matched.
    ///
    /// Never fails: without usable credentials this returns the documented
    /// mock fallback, and platform errors degrade to partial or empty
    /// results.
    async fn scan(&self, keywords: &[String], min_viewers: u32) -> Vec<LiveStream>;

    /// Checks which of the given saved streamers are live right now.
    /// Streamers from other platforms are ignored.
    async fn live_status(&self, streamers: &[Streamer]) -> Vec<LiveStream>;
}

/// Deduplicates by `(platform, username)`, keeping first occurrences, then
/// applies the viewer floor.
pub(crate) fn dedup_and_filter(streams: Vec<LiveStream>, min_viewers: u32) -> Vec<LiveStream> {
    let mut seen = std::collections::HashSet::new();
    streams
        .into_iter()
        .filter(|s| seen.insert(s.identity()))
        .filter(|s| s.viewer_count >= min_viewers)
        .collect()
}
