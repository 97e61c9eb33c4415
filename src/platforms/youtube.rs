//! YouTube Live discovery via the Data API v3.
//!
//! Search results carry no viewer counts, so each keyword's hits get a
//! batched `videos` follow-up for `liveStreamingDetails.concurrentViewers`.
//! Auth prefers the OAuth bearer token (refreshed via the refresh token when
//! close to expiry) and falls back to an API key passed as a query
//! parameter.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use crate::fetch::Fetcher;
use crate::model::{LiveStream, OAuthCredentials, Platform, Streamer};
use crate::platforms::{PlatformAdapter, dedup_and_filter, mock};
use crate::store::CredentialStore;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Keywords consumed per scan pass; search costs 100 quota units a call.
const KEYWORDS_PER_SCAN: usize = 5;
/// Saved streamers checked per status call, same quota concern.
const STREAMERS_PER_STATUS: usize = 10;
/// Refresh the token when it expires within this many seconds.
const REFRESH_SKEW_SECS: i64 = 60;

pub struct YouTubeAdapter {
    credentials: CredentialStore,
    fetcher: Fetcher,
    active: AtomicBool,
    api_base: String,
    token_url: String,
}

/// How a request authenticates against the Data API.
#[derive(Clone)]
enum AuthMode {
    Bearer(String),
    ApiKey(String),
}

enum ScanInterrupt {
    /// Bearer token rejected; carries the results gathered so far.
    Unauthorized(Vec<LiveStream>),
    /// Transport gave out or the search payload was malformed.
    Degraded,
}

impl YouTubeAdapter {
    pub fn new(credentials: CredentialStore, fetcher: Fetcher) -> Self {
        YouTubeAdapter {
            credentials,
            fetcher,
            active: AtomicBool::new(true),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    /// Points the adapter at different endpoints, for tests.
    pub fn with_base_urls(mut self, api_base: &str, token_url: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.token_url = token_url.to_string();
        self
    }

    /// Resolves how to authenticate, refreshing a near-expiry token first.
    /// `None` means fall back to mock data.
    async fn resolve_auth(&self) -> Option<AuthMode> {
        let creds = self.credentials.get(Platform::YouTube)?;
        if !creds.needs_refresh(REFRESH_SKEW_SECS)
            && let Some(token) = &creds.access_token
        {
            return Some(AuthMode::Bearer(token.clone()));
        }
        if let Some(token) = self.refresh_token(&creds).await {
            return Some(AuthMode::Bearer(token));
        }
        // No usable token; an API key still gets real results.
        creds.api_key.clone().map(AuthMode::ApiKey)
    }

    /// Exchanges the refresh token for a new access token, storing it on
    /// success. A failed refresh leaves the store untouched.
    async fn refresh_token(&self, creds: &OAuthCredentials) -> Option<String> {
        let (client_id, refresh_token) = match (&creds.client_id, &creds.refresh_token) {
            (Some(id), Some(refresh)) => (id.clone(), refresh.clone()),
            _ => return None,
        };
        let mut form = vec![
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token".to_string()),
        ];
        if let Some(secret) = &creds.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        let request = self
            .fetcher
            .client()
            .post(&self.token_url)
            .form(&form)
            .build()
            .ok()?;
        let response = match self.fetcher.execute(Platform::YouTube, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "youtube token refresh transport failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(
                status = response.status().as_u16(),
                "youtube refused the refresh token"
            );
            return None;
        }
        let refreshed: RefreshResponse = match response.json().await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable youtube token response");
                return None;
            }
        };

        let mut updated = creds.clone();
        updated.access_token = Some(refreshed.access_token.clone());
        updated.token_expiry = Some(OAuthCredentials::expiry_in(
            refreshed.expires_in.unwrap_or(3600),
        ));
        self.credentials.set(Platform::YouTube, updated);
        tracing::info!("refreshed youtube access token");
        Some(refreshed.access_token)
    }

    fn api_request(
        &self,
        path: &str,
        query: &[(&str, &str)],
        auth: &AuthMode,
    ) -> Result<reqwest::Request, reqwest::Error> {
        let mut builder = self
            .fetcher
            .client()
            .get(format!("{}/{path}", self.api_base))
            .query(query);
        match auth {
            AuthMode::Bearer(token) => builder = builder.bearer_auth(token),
            AuthMode::ApiKey(key) => builder = builder.query(&[("key", key.as_str())]),
        }
        builder.build()
    }

    async fn scan_keywords(
        &self,
        keywords: &[String],
        auth: &AuthMode,
    ) -> Result<Vec<LiveStream>, ScanInterrupt> {
        let mut results = Vec::new();
        for keyword in keywords {
            let request = self
                .api_request(
                    "search",
                    &[
                        ("part", "snippet"),
                        ("eventType", "live"),
                        ("type", "video"),
                        ("q", keyword.as_str()),
                        ("maxResults", "25"),
                    ],
                    auth,
                )
                .map_err(|_| ScanInterrupt::Degraded)?;
            let response = self
                .fetcher
                .execute(Platform::YouTube, request)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "youtube search transport gave out");
                    ScanInterrupt::Degraded
                })?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                return Err(ScanInterrupt::Unauthorized(results));
            }
            if !response.status().is_success() {
                tracing::warn!(
                    keyword = %keyword,
                    status = response.status().as_u16(),
                    "youtube search failed, skipping keyword"
                );
                continue;
            }
            let search: SearchResponse = response.json().await.map_err(|e| {
                tracing::warn!(error = %e, "unexpected youtube search payload");
                ScanInterrupt::Degraded
            })?;

            let video_ids: Vec<String> = search
                .items
                .iter()
                .filter_map(|item| item.id.video_id.clone())
                .collect();
            if video_ids.is_empty() {
                continue;
            }

            match self.video_details(&video_ids, auth).await {
                Some(videos) => {
                    for video in videos {
                        if video.snippet.live_broadcast_content != "live" {
                            continue;
                        }
                        let viewer_count = video
                            .live_streaming_details
                            .and_then(|d| d.concurrent_viewers)
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        results.push(normalize(video.id, video.snippet, viewer_count, keyword));
                    }
                }
                None => {
                    // Counts unavailable; keep the search hits with zero
                    // viewers rather than dropping the keyword.
                    for item in search.items {
                        let (Some(id), Some(snippet)) = (item.id.video_id, item.snippet) else {
                            continue;
                        };
                        results.push(normalize(id, snippet, 0, keyword));
                    }
                }
            }
        }
        Ok(results)
    }

    /// Batched `videos` lookup for live details. `None` means the follow-up
    /// failed and callers should degrade to zero counts.
    async fn video_details(&self, video_ids: &[String], auth: &AuthMode) -> Option<Vec<VideoItem>> {
        let ids = video_ids.join(",");
        let request = self
            .api_request(
                "videos",
                &[
                    ("part", "liveStreamingDetails,statistics,snippet"),
                    ("id", ids.as_str()),
                ],
                auth,
            )
            .ok()?;
        match self.fetcher.execute(Platform::YouTube, request).await {
            Ok(response) if response.status().is_success() => {
                match response.json::<VideosResponse>().await {
                    Ok(videos) => Some(videos.items),
                    Err(e) => {
                        tracing::debug!(error = %e, "unreadable youtube videos payload");
                        None
                    }
                }
            }
            Ok(response) => {
                tracing::debug!(
                    status = response.status().as_u16(),
                    "youtube videos lookup failed, degrading to zero counts"
                );
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "youtube videos lookup transport failed");
                None
            }
        }
    }
}

fn normalize(video_id: String, snippet: Snippet, viewer_count: u32, keyword: &str) -> LiveStream {
    LiveStream {
        platform: Platform::YouTube,
        username: snippet.channel_title.clone(),
        display_name: snippet.channel_title,
        title: snippet.title,
        viewer_count,
        url: format!("https://youtube.com/watch?v={video_id}"),
        thumbnail_url: snippet.thumbnails.medium.map(|t| t.url),
        is_live: true,
        matched_keyword: keyword.to_string(),
        game: None,
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn label(&self) -> &str {
        "YouTube Live Scanner"
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated(Platform::YouTube)
    }

    #[tracing::instrument(skip(self, keywords))]
    async fn scan(&self, keywords: &[String], min_viewers: u32) -> Vec<LiveStream> {
        let keywords = &keywords[..keywords.len().min(KEYWORDS_PER_SCAN)];
        let Some(auth) = self.resolve_auth().await else {
            tracing::debug!("no youtube credentials, serving mock results");
            return mock::mock_streams(Platform::YouTube, keywords, min_viewers);
        };

        let mut auth = auth;
        let mut retried = false;
        loop {
            match self.scan_keywords(keywords, &auth).await {
                Ok(streams) => return dedup_and_filter(streams, min_viewers),
                Err(ScanInterrupt::Unauthorized(partial)) => {
                    let creds = self
                        .credentials
                        .get(Platform::YouTube)
                        .unwrap_or_else(|| OAuthCredentials::empty(Platform::YouTube));
                    if !retried && let Some(token) = self.refresh_token(&creds).await {
                        // One re-auth, then the whole keyword batch again.
                        tracing::info!("youtube 401 mid-scan, refreshed and rescanning");
                        auth = AuthMode::Bearer(token);
                        retried = true;
                        continue;
                    }
                    tracing::warn!("youtube re-authentication failed, keeping partial results");
                    self.credentials.clear(Platform::YouTube);
                    return dedup_and_filter(partial, min_viewers);
                }
                Err(ScanInterrupt::Degraded) => {
                    tracing::warn!("youtube scan degraded, serving mock results");
                    return mock::mock_streams(Platform::YouTube, keywords, min_viewers);
                }
            }
        }
    }

    async fn live_status(&self, streamers: &[Streamer]) -> Vec<LiveStream> {
        let handles: Vec<&Streamer> = streamers
            .iter()
            .filter(|s| s.platform == Platform::YouTube)
            .take(STREAMERS_PER_STATUS)
            .collect();
        if handles.is_empty() {
            return Vec::new();
        }
        let Some(auth) = self.resolve_auth().await else {
            return Vec::new();
        };

        let mut live = Vec::new();
        for streamer in handles {
            // One search per streamer; cheap relative to the keyword scan
            // because results are capped low.
            let queries = vec![streamer.handle.clone()];
            match self.scan_keywords(&queries, &auth).await {
                Ok(streams) => live.extend(streams.into_iter().filter(|s| {
                    s.username.eq_ignore_ascii_case(&streamer.handle)
                        || s.display_name.eq_ignore_ascii_case(&streamer.display_name)
                })),
                Err(_) => continue,
            }
        }
        dedup_and_filter(live, 0)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    #[serde(default)]
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    live_broadcast_content: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    medium: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    snippet: Snippet,
    #[serde(default)]
    live_streaming_details: Option<LiveDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveDetails {
    #[serde(default)]
    concurrent_viewers: Option<String>,
}
