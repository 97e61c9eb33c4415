//! Persistence: the host-provided key-value contract plus the credential
//! store and saved-streamer registry built on top of it.
//!
//! Everything is stored as JSON blobs under well-known keys, so a host can
//! back [`KvStore`] with whatever it has (browser local storage, platform
//! preferences, a settings file). Unreadable blobs are logged and treated as
//! absent rather than failing startup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jiff::Timestamp;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::model::{CredentialUpdate, OAuthCredentials, Platform, ScanConfig, Streamer};

/// Storage key for the scan configuration blob.
pub const SETTINGS_KEY: &str = "scanner_settings";
/// Storage key for the saved streamer list.
pub const STREAMERS_KEY: &str = "saved_streamers";

/// The external persistence collaborator. Absent keys mean defaults.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-process [`KvStore`], used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

fn auth_key(platform: Platform) -> String {
    format!("{platform}_auth")
}

fn load_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Option<T> {
    let raw = kv.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring unreadable blob");
            None
        }
    }
}

fn store_json<T: Serialize>(kv: &dyn KvStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => kv.set(key, &raw),
        Err(e) => tracing::error!(key, error = %e, "failed to serialize blob"),
    }
}

pub(crate) fn load_scan_config(kv: &dyn KvStore) -> Option<ScanConfig> {
    load_json(kv, SETTINGS_KEY)
}

pub(crate) fn store_scan_config(kv: &dyn KvStore, config: &ScanConfig) {
    store_json(kv, SETTINGS_KEY, config);
}

/// Owns every platform's [`OAuthCredentials`], writing through to the
/// [`KvStore`] on every change.
///
/// All credential mutation flows through this store under one lock, so a
/// reader never observes a half-applied refresh.
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
    cache: Arc<Mutex<HashMap<Platform, OAuthCredentials>>>,
}

impl CredentialStore {
    /// Loads whatever credentials the store already holds.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let mut cache = HashMap::new();
        for platform in Platform::ALL {
            if let Some(creds) = load_json::<OAuthCredentials>(&*kv, &auth_key(platform)) {
                cache.insert(platform, creds);
            }
        }
        CredentialStore {
            kv,
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    pub fn get(&self, platform: Platform) -> Option<OAuthCredentials> {
        self.cache.lock().unwrap().get(&platform).cloned()
    }

    /// Stores credentials for a platform and persists them.
    ///
    /// An access token that is already past its expiry is dropped on the way
    /// in, so a stale token can never be stored as fresh. Ids, API key, and
    /// refresh token are kept as given.
    pub fn set(&self, platform: Platform, mut creds: OAuthCredentials) {
        creds.platform = platform;
        if let Some(expiry) = creds.token_expiry
            && expiry <= Timestamp::now()
        {
            tracing::debug!(%platform, "dropping already-expired access token");
            creds.access_token = None;
            creds.token_expiry = None;
        }
        let mut cache = self.cache.lock().unwrap();
        store_json(&*self.kv, &auth_key(platform), &creds);
        cache.insert(platform, creds);
    }

    /// Merges host-supplied fields into the platform's credentials.
    pub fn configure(&self, platform: Platform, update: CredentialUpdate) {
        let mut cache = self.cache.lock().unwrap();
        let creds = cache
            .entry(platform)
            .or_insert_with(|| OAuthCredentials::empty(platform));
        if let Some(client_id) = update.client_id {
            creds.client_id = Some(client_id);
        }
        if let Some(client_secret) = update.client_secret {
            creds.client_secret = Some(client_secret);
        }
        if let Some(api_key) = update.api_key {
            creds.api_key = Some(api_key);
        }
        store_json(&*self.kv, &auth_key(platform), creds);
    }

    /// Drops the platform's tokens (sign-out, or an irrecoverable 401) while
    /// keeping client id, secret, and API key for later re-authentication.
    pub fn clear(&self, platform: Platform) {
        let mut cache = self.cache.lock().unwrap();
        let mut creds = cache
            .remove(&platform)
            .unwrap_or_else(|| OAuthCredentials::empty(platform));
        creds.access_token = None;
        creds.refresh_token = None;
        creds.token_expiry = None;
        store_json(&*self.kv, &auth_key(platform), &creds);
        cache.insert(platform, creds);
    }

    /// Whether the platform currently holds a usable token.
    pub fn is_authenticated(&self, platform: Platform) -> bool {
        self.get(platform).is_some_and(|c| c.is_authenticated())
    }
}

/// The user-curated list of saved streamers, persisted as one JSON array.
#[derive(Clone)]
pub struct StreamerRegistry {
    kv: Arc<dyn KvStore>,
    streamers: Arc<Mutex<Vec<Streamer>>>,
}

impl StreamerRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let streamers = load_json::<Vec<Streamer>>(&*kv, STREAMERS_KEY).unwrap_or_default();
        StreamerRegistry {
            kv,
            streamers: Arc::new(Mutex::new(streamers)),
        }
    }

    pub fn list(&self) -> Vec<Streamer> {
        self.streamers.lock().unwrap().clone()
    }

    /// Saves a streamer. A colliding id replaces the existing entry in place,
    /// so saving is idempotent.
    pub fn upsert(&self, streamer: Streamer) {
        let mut streamers = self.streamers.lock().unwrap();
        match streamers.iter_mut().find(|s| s.id == streamer.id) {
            Some(existing) => *existing = streamer,
            None => streamers.push(streamer),
        }
        store_json(&*self.kv, STREAMERS_KEY, &*streamers);
    }

    /// Removes a saved streamer by id. Returns false if it was not present.
    pub fn remove(&self, id: &str) -> bool {
        let mut streamers = self.streamers.lock().unwrap();
        let before = streamers.len();
        streamers.retain(|s| s.id != id);
        let removed = streamers.len() != before;
        if removed {
            store_json(&*self.kv, STREAMERS_KEY, &*streamers);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn credentials_write_through_and_reload() {
        let kv = kv();
        let store = CredentialStore::new(kv.clone());

        let mut creds = OAuthCredentials::empty(Platform::Twitch);
        creds.client_id = Some("id".into());
        creds.access_token = Some("tok".into());
        creds.token_expiry = Some(OAuthCredentials::expiry_in(3600));
        store.set(Platform::Twitch, creds);

        // The blob is on disk (well, in the kv) immediately.
        assert!(kv.get("twitch_auth").unwrap().contains("\"tok\""));

        // A fresh store over the same kv sees the same credentials.
        let reloaded = CredentialStore::new(kv.clone());
        assert!(reloaded.is_authenticated(Platform::Twitch));
        assert_eq!(
            reloaded.get(Platform::Twitch).unwrap().client_id.as_deref(),
            Some("id")
        );
    }

    #[test]
    fn set_drops_expired_tokens_but_keeps_identity() {
        let store = CredentialStore::new(kv());
        let mut creds = OAuthCredentials::empty(Platform::YouTube);
        creds.client_id = Some("id".into());
        creds.api_key = Some("key".into());
        creds.refresh_token = Some("refresh".into());
        creds.access_token = Some("stale".into());
        creds.token_expiry = Some(Timestamp::now() - jiff::SignedDuration::from_secs(5));

        store.set(Platform::YouTube, creds);
        let stored = store.get(Platform::YouTube).unwrap();
        assert_eq!(stored.access_token, None);
        assert_eq!(stored.token_expiry, None);
        assert_eq!(stored.client_id.as_deref(), Some("id"));
        assert_eq!(stored.api_key.as_deref(), Some("key"));
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
        assert!(!store.is_authenticated(Platform::YouTube));
    }

    #[test]
    fn clear_keeps_ids_and_api_key() {
        let store = CredentialStore::new(kv());
        let mut creds = OAuthCredentials::empty(Platform::Twitch);
        creds.client_id = Some("id".into());
        creds.client_secret = Some("secret".into());
        creds.api_key = Some("key".into());
        creds.access_token = Some("tok".into());
        creds.refresh_token = Some("refresh".into());
        store.set(Platform::Twitch, creds);
        assert!(store.is_authenticated(Platform::Twitch));

        store.clear(Platform::Twitch);
        let cleared = store.get(Platform::Twitch).unwrap();
        assert!(!store.is_authenticated(Platform::Twitch));
        assert_eq!(cleared.access_token, None);
        assert_eq!(cleared.refresh_token, None);
        assert_eq!(cleared.client_id.as_deref(), Some("id"));
        assert_eq!(cleared.client_secret.as_deref(), Some("secret"));
        assert_eq!(cleared.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn configure_merges_without_clobbering() {
        let store = CredentialStore::new(kv());
        store.configure(
            Platform::YouTube,
            CredentialUpdate {
                api_key: Some("key".into()),
                ..CredentialUpdate::default()
            },
        );
        store.configure(
            Platform::YouTube,
            CredentialUpdate {
                client_id: Some("id".into()),
                ..CredentialUpdate::default()
            },
        );
        let creds = store.get(Platform::YouTube).unwrap();
        assert_eq!(creds.api_key.as_deref(), Some("key"));
        assert_eq!(creds.client_id.as_deref(), Some("id"));
    }

    #[test]
    fn upsert_replaces_instead_of_duplicating() {
        let kv = kv();
        let registry = StreamerRegistry::new(kv.clone());
        registry.upsert(Streamer::new(
            Platform::Twitch,
            "ferris",
            "Ferris",
            "https://twitch.tv/ferris",
        ));
        registry.upsert(Streamer::new(
            Platform::Kick,
            "ferris",
            "Ferris on Kick",
            "https://kick.com/ferris",
        ));
        assert_eq!(registry.list().len(), 2);

        // Saving the same (platform, handle) again updates in place.
        registry.upsert(Streamer::new(
            Platform::Twitch,
            "Ferris",
            "Ferris Renamed",
            "https://twitch.tv/ferris",
        ));
        let streamers = registry.list();
        assert_eq!(streamers.len(), 2);
        assert_eq!(
            streamers
                .iter()
                .find(|s| s.id == "twitch:ferris")
                .unwrap()
                .display_name,
            "Ferris Renamed"
        );

        // And the persisted blob survives a reload.
        let reloaded = StreamerRegistry::new(kv);
        assert_eq!(reloaded.list().len(), 2);
    }

    #[test]
    fn remove_reports_whether_anything_went_away() {
        let registry = StreamerRegistry::new(kv());
        registry.upsert(Streamer::new(
            Platform::TikTok,
            "dancer",
            "Dancer",
            "https://tiktok.com/@dancer",
        ));
        assert!(registry.remove("tiktok:dancer"));
        assert!(!registry.remove("tiktok:dancer"));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn unreadable_blobs_are_treated_as_absent() {
        let kv = kv();
        kv.set(STREAMERS_KEY, "not json at all");
        kv.set("twitch_auth", "{\"also\": \"wrong shape\"}");
        let registry = StreamerRegistry::new(kv.clone());
        assert!(registry.list().is_empty());
        let store = CredentialStore::new(kv);
        assert!(store.get(Platform::Twitch).is_none());
    }
}
