//! Multi-platform live-stream discovery.
//!
//! The crate watches several streaming platforms for live broadcasts that
//! match a set of keywords, merges the hits into one ranked list, and polls
//! on a timer. Platforms with real APIs (Twitch, YouTube) authenticate over
//! OAuth through a localhost redirect listener and fall back to
//! deterministic placeholder data when no credentials are configured;
//! platforms without public search APIs (Kick, TikTok) serve placeholder
//! data only.
//!
//! A host embeds the engine through [`ScanCoordinator`], supplying a
//! [`store::KvStore`] for settings and credential persistence:
//!
//! ```no_run
//! use std::sync::Arc;
//! use stream_scout::{ScanCoordinator, model::{ScanConfig, ScannerLimits}};
//! use stream_scout::store::MemoryStore;
//!
//! # async fn demo() -> Result<(), stream_scout::Error> {
//! let scout = ScanCoordinator::new(Arc::new(MemoryStore::new()), ScannerLimits::default());
//! scout
//!     .start_scanning(ScanConfig {
//!         keywords: vec!["rust".into(), "chess".into()],
//!         min_viewers: 10,
//!         ..ScanConfig::default()
//!     })
//!     .await?;
//! for stream in scout.latest_results() {
//!     println!("{} {}: {} viewers", stream.platform, stream.username, stream.viewer_count);
//! }
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod model;
pub mod oauth;
pub mod platforms;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use coordinator::{AdapterInfo, ScanCoordinator};
pub use error::Error;
pub use model::{LiveStream, Platform, ScanConfig, ScannerLimits, Streamer};
