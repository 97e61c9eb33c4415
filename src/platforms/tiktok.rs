//! TikTok Live discovery.
//!
//! TikTok's live API is restricted to approved partners, so this adapter
//! lives permanently in the documented mock branch.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::model::{LiveStream, Platform, Streamer};
use crate::platforms::{PlatformAdapter, mock};
use crate::store::CredentialStore;

pub struct TikTokAdapter {
    credentials: CredentialStore,
    active: AtomicBool,
}

impl TikTokAdapter {
    pub fn new(credentials: CredentialStore) -> Self {
        TikTokAdapter {
            credentials,
            active: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn label(&self) -> &str {
        "TikTok Live Scanner"
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated(Platform::TikTok)
    }

    async fn scan(&self, keywords: &[String], min_viewers: u32) -> Vec<LiveStream> {
        mock::mock_streams(Platform::TikTok, keywords, min_viewers)
    }

    async fn live_status(&self, _streamers: &[Streamer]) -> Vec<LiveStream> {
        Vec::new()
    }
}
