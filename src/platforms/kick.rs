//! Kick discovery.
//!
//! Kick has no public search API, so this adapter lives permanently in the
//! documented mock branch. It still participates in passes like any other
//! adapter so the aggregate surface stays uniform.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::model::{LiveStream, Platform, Streamer};
use crate::platforms::{PlatformAdapter, mock};
use crate::store::CredentialStore;

pub struct KickAdapter {
    credentials: CredentialStore,
    active: AtomicBool,
}

impl KickAdapter {
    pub fn new(credentials: CredentialStore) -> Self {
        KickAdapter {
            credentials,
            active: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl PlatformAdapter for KickAdapter {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    fn label(&self) -> &str {
        "Kick Scanner"
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated(Platform::Kick)
    }

    async fn scan(&self, keywords: &[String], min_viewers: u32) -> Vec<LiveStream> {
        mock::mock_streams(Platform::Kick, keywords, min_viewers)
    }

    async fn live_status(&self, _streamers: &[Streamer]) -> Vec<LiveStream> {
        Vec::new()
    }
}
