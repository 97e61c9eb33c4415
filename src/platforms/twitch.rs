//! Twitch discovery via the Helix API.
//!
//! Search goes through `search/channels`, which does not report viewer
//! counts, so each keyword's hits get a batched `streams` follow-up for the
//! counts. App access tokens come from the client-credentials grant and are
//! re-issued automatically when they near expiry or a call comes back 401.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use crate::fetch::Fetcher;
use crate::model::{LiveStream, OAuthCredentials, Platform, Streamer};
use crate::platforms::{PlatformAdapter, dedup_and_filter, mock};
use crate::store::CredentialStore;

const DEFAULT_API_BASE: &str = "https://api.twitch.tv/helix";
const DEFAULT_AUTH_BASE: &str = "https://id.twitch.tv/oauth2";

/// Keywords consumed per scan pass, to respect Helix rate budgets.
const KEYWORDS_PER_SCAN: usize = 10;
/// Refresh the token when it expires within this many seconds.
const REFRESH_SKEW_SECS: i64 = 60;
/// `streams` accepts at most this many `user_login` filters per call.
const LOGINS_PER_STATUS_CALL: usize = 100;

pub struct TwitchAdapter {
    credentials: CredentialStore,
    fetcher: Fetcher,
    active: AtomicBool,
    api_base: String,
    auth_base: String,
}

/// Why an authenticated keyword loop stopped early.
enum ScanInterrupt {
    /// The API rejected our token; carries the results gathered so far.
    Unauthorized(Vec<LiveStream>),
    /// Transport gave out or the search payload was malformed; the caller
    /// falls back to mock data.
    Degraded,
}

impl TwitchAdapter {
    pub fn new(credentials: CredentialStore, fetcher: Fetcher) -> Self {
        TwitchAdapter {
            credentials,
            fetcher,
            active: AtomicBool::new(true),
            api_base: DEFAULT_API_BASE.to_string(),
            auth_base: DEFAULT_AUTH_BASE.to_string(),
        }
    }

    /// Points the adapter at different endpoints, for tests.
    pub fn with_base_urls(mut self, api_base: &str, auth_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self
    }

    /// A fresh-enough token and the client id to present with it, or `None`
    /// when the adapter should fall back to mock data.
    async fn ensure_fresh_token(&self) -> Option<(String, String)> {
        let creds = self.credentials.get(Platform::Twitch)?;
        if !creds.needs_refresh(REFRESH_SKEW_SECS)
            && let (Some(client_id), Some(token)) = (&creds.client_id, &creds.access_token)
        {
            return Some((client_id.clone(), token.clone()));
        }
        // Expired or expiring soon; re-issue via client credentials if we
        // can. A failed re-issue leaves the store untouched; the stale
        // token already reads as unauthenticated.
        self.regenerate_token(&creds).await
    }

    /// Client-credentials grant for an app access token. Stores the new
    /// token on success.
    async fn regenerate_token(&self, creds: &OAuthCredentials) -> Option<(String, String)> {
        let (client_id, client_secret) = match (&creds.client_id, &creds.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => return None,
        };
        let request = self
            .fetcher
            .client()
            .post(format!("{}/token", self.auth_base))
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .build()
            .ok()?;
        let response = match self.fetcher.execute(Platform::Twitch, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "twitch token request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(
                status = response.status().as_u16(),
                "twitch refused to issue an app token"
            );
            return None;
        }
        let issued: AppTokenResponse = match response.json().await {
            Ok(issued) => issued,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable twitch token response");
                return None;
            }
        };

        let mut updated = creds.clone();
        updated.access_token = Some(issued.access_token.clone());
        updated.token_expiry = Some(OAuthCredentials::expiry_in(
            issued.expires_in.unwrap_or(3600),
        ));
        self.credentials.set(Platform::Twitch, updated);
        tracing::info!("issued a fresh twitch app token");
        Some((client_id, issued.access_token))
    }

    async fn scan_keywords(
        &self,
        keywords: &[String],
        client_id: &str,
        token: &str,
    ) -> Result<Vec<LiveStream>, ScanInterrupt> {
        let mut results = Vec::new();
        for keyword in keywords {
            let request = self
                .fetcher
                .client()
                .get(format!("{}/search/channels", self.api_base))
                .query(&[("query", keyword.as_str()), ("live_only", "true")])
                .header("Client-ID", client_id)
                .bearer_auth(token)
                .build()
                .map_err(|_| ScanInterrupt::Degraded)?;
            let response = self
                .fetcher
                .execute(Platform::Twitch, request)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "twitch search transport gave out");
                    ScanInterrupt::Degraded
                })?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ScanInterrupt::Unauthorized(results));
            }
            if !response.status().is_success() {
                tracing::warn!(
                    keyword = %keyword,
                    status = response.status().as_u16(),
                    "twitch search failed, skipping keyword"
                );
                continue;
            }
            let search: SearchChannelsResponse = response.json().await.map_err(|e| {
                tracing::warn!(error = %e, "unexpected twitch search payload");
                ScanInterrupt::Degraded
            })?;

            let live: Vec<SearchedChannel> =
                search.data.into_iter().filter(|c| c.is_live).collect();
            if live.is_empty() {
                continue;
            }
            let logins: Vec<&str> = live.iter().map(|c| c.broadcaster_login.as_str()).collect();
            let counts = self.viewer_counts(client_id, token, &logins).await;

            for channel in live {
                let viewer_count = counts
                    .iter()
                    .find(|s| s.user_login.eq_ignore_ascii_case(&channel.broadcaster_login))
                    .map(|s| s.viewer_count)
                    .unwrap_or(0);
                results.push(LiveStream {
                    platform: Platform::Twitch,
                    url: format!("https://twitch.tv/{}", channel.broadcaster_login),
                    username: channel.broadcaster_login,
                    display_name: channel.display_name,
                    title: if channel.title.is_empty() {
                        "Untitled Stream".to_string()
                    } else {
                        channel.title
                    },
                    viewer_count,
                    thumbnail_url: channel.thumbnail_url,
                    is_live: true,
                    matched_keyword: keyword.clone(),
                    game: (!channel.game_name.is_empty()).then_some(channel.game_name),
                });
            }
        }
        Ok(results)
    }

    /// Batched `streams` lookup for viewer counts. Failure degrades to an
    /// empty list (zero counts), never aborts the pass.
    async fn viewer_counts(&self, client_id: &str, token: &str, logins: &[&str]) -> Vec<HelixStream> {
        let query: Vec<(&str, &str)> = logins
            .iter()
            .take(LOGINS_PER_STATUS_CALL)
            .map(|login| ("user_login", *login))
            .collect();
        let request = match self
            .fetcher
            .client()
            .get(format!("{}/streams", self.api_base))
            .query(&query)
            .header("Client-ID", client_id)
            .bearer_auth(token)
            .build()
        {
            Ok(request) => request,
            Err(_) => return Vec::new(),
        };
        match self.fetcher.execute(Platform::Twitch, request).await {
            Ok(response) if response.status().is_success() => response
                .json::<StreamsResponse>()
                .await
                .map(|r| r.data)
                .unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "unreadable twitch streams payload");
                    Vec::new()
                }),
            Ok(response) => {
                tracing::debug!(
                    status = response.status().as_u16(),
                    "twitch streams lookup failed, using zero counts"
                );
                Vec::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "twitch streams lookup transport failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for TwitchAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    fn label(&self) -> &str {
        "Twitch Scanner"
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated(Platform::Twitch)
    }

    #[tracing::instrument(skip(self, keywords))]
    async fn scan(&self, keywords: &[String], min_viewers: u32) -> Vec<LiveStream> {
        let keywords = &keywords[..keywords.len().min(KEYWORDS_PER_SCAN)];
        let Some((client_id, token)) = self.ensure_fresh_token().await else {
            tracing::debug!("no twitch credentials, serving mock results");
            return mock::mock_streams(Platform::Twitch, keywords, min_viewers);
        };

        let mut client_id = client_id;
        let mut token = token;
        let mut retried = false;
        loop {
            match self.scan_keywords(keywords, &client_id, &token).await {
                Ok(streams) => return dedup_and_filter(streams, min_viewers),
                Err(ScanInterrupt::Unauthorized(partial)) => {
                    let creds = self
                        .credentials
                        .get(Platform::Twitch)
                        .unwrap_or_else(|| OAuthCredentials::empty(Platform::Twitch));
                    if !retried && let Some(fresh) = self.regenerate_token(&creds).await {
                        // One re-auth, then the whole keyword batch again.
                        tracing::info!("twitch 401 mid-scan, re-authenticated and rescanning");
                        (client_id, token) = fresh;
                        retried = true;
                        continue;
                    }
                    tracing::warn!("twitch re-authentication failed, keeping partial results");
                    self.credentials.clear(Platform::Twitch);
                    return dedup_and_filter(partial, min_viewers);
                }
                Err(ScanInterrupt::Degraded) => {
                    tracing::warn!("twitch scan degraded, serving mock results");
                    return mock::mock_streams(Platform::Twitch, keywords, min_viewers);
                }
            }
        }
    }

    async fn live_status(&self, streamers: &[Streamer]) -> Vec<LiveStream> {
        let handles: Vec<&str> = streamers
            .iter()
            .filter(|s| s.platform == Platform::Twitch)
            .map(|s| s.handle.as_str())
            .collect();
        if handles.is_empty() {
            return Vec::new();
        }
        let Some((client_id, token)) = self.ensure_fresh_token().await else {
            return Vec::new();
        };

        self.viewer_counts(&client_id, &token, &handles)
            .await
            .into_iter()
            .map(|stream| LiveStream {
                platform: Platform::Twitch,
                url: format!("https://twitch.tv/{}", stream.user_login),
                matched_keyword: stream.user_login.clone(),
                username: stream.user_login,
                display_name: stream.user_name,
                title: stream.title,
                viewer_count: stream.viewer_count,
                thumbnail_url: stream.thumbnail_url,
                is_live: true,
                game: (!stream.game_name.is_empty()).then_some(stream.game_name),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct AppTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchChannelsResponse {
    #[serde(default)]
    data: Vec<SearchedChannel>,
}

#[derive(Debug, Deserialize)]
struct SearchedChannel {
    broadcaster_login: String,
    display_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    game_name: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
    is_live: bool,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<HelixStream>,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    user_login: String,
    user_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    game_name: String,
    viewer_count: u32,
    #[serde(default)]
    thumbnail_url: Option<String>,
}
