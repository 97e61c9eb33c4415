//! Shared data model: platforms, normalized stream results, credentials,
//! saved streamers, and the scan configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Minimum keyword length, in characters.
pub const MIN_KEYWORD_LEN: usize = 2;
/// Maximum keyword length, in characters.
pub const MAX_KEYWORD_LEN: usize = 100;
/// Upper clamp for the viewer floor; anything above this is meaningless.
pub const MAX_VIEWER_FLOOR: u32 = 1_000_000;

/// The platforms the engine can discover streams on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
    YouTube,
    Kick,
    TikTok,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Twitch,
        Platform::YouTube,
        Platform::Kick,
        Platform::TikTok,
    ];

    /// Stable lowercase name, used in persistence keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::YouTube => "youtube",
            Platform::Kick => "kick",
            Platform::TikTok => "tiktok",
        }
    }

    /// Parses the lowercase name produced by [`Platform::as_str`].
    pub fn from_name(name: &str) -> Option<Platform> {
        match name.trim().to_ascii_lowercase().as_str() {
            "twitch" => Some(Platform::Twitch),
            "youtube" => Some(Platform::YouTube),
            "kick" => Some(Platform::Kick),
            "tiktok" => Some(Platform::TikTok),
            _ => None,
        }
    }

    /// Glyph presentation layers show next to results from this platform.
    pub fn glyph(&self) -> &'static str {
        match self {
            Platform::Twitch => "\u{1f7e3}",
            Platform::YouTube => "\u{1f534}",
            Platform::Kick => "\u{1f7e2}",
            Platform::TikTok => "\u{26ab}",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live stream discovered during a scan pass.
///
/// Every adapter normalizes its platform's payload into this shape. Each pass
/// produces a fresh list; consumers replace their previous one, never merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStream {
    pub platform: Platform,
    /// Stable login or handle on the platform. Identity within a pass is
    /// `(platform, username)`, compared case-insensitively.
    pub username: String,
    pub display_name: String,
    pub title: String,
    pub viewer_count: u32,
    /// Direct link to the stream.
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub is_live: bool,
    /// The scan keyword this result matched.
    pub matched_keyword: String,
    /// Game or category, where the platform reports one.
    pub game: Option<String>,
}

impl LiveStream {
    /// Dedup key within one scan pass.
    pub fn identity(&self) -> (Platform, String) {
        (self.platform, self.username.to_lowercase())
    }
}

/// A streamer the user chose to keep an eye on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streamer {
    /// Composite key `"<platform>:<handle>"`, handle lowercased.
    pub id: String,
    pub platform: Platform,
    pub handle: String,
    pub display_name: String,
    pub profile_url: String,
    pub created_at: Timestamp,
}

impl Streamer {
    pub fn new(platform: Platform, handle: &str, display_name: &str, profile_url: &str) -> Self {
        let handle = handle.trim().trim_start_matches('@').to_string();
        Streamer {
            id: Streamer::id_for(platform, &handle),
            platform,
            handle,
            display_name: display_name.to_string(),
            profile_url: profile_url.to_string(),
            created_at: Timestamp::now(),
        }
    }

    /// The stable composite id for a platform and handle.
    pub fn id_for(platform: Platform, handle: &str) -> String {
        format!(
            "{platform}:{}",
            handle.trim().trim_start_matches('@').to_lowercase()
        )
    }
}

/// Authentication material for one platform.
///
/// Exclusively owned by the [`CredentialStore`](crate::store::CredentialStore);
/// adapters and flows receive transient clones and write changes back through
/// the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub platform: Platform,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Key for platforms that accept API-key auth as a token alternative.
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute expiry of `access_token`; `None` means it never expires.
    pub token_expiry: Option<Timestamp>,
}

impl OAuthCredentials {
    /// Empty credentials for a platform.
    pub fn empty(platform: Platform) -> Self {
        OAuthCredentials {
            platform,
            client_id: None,
            client_secret: None,
            api_key: None,
            access_token: None,
            refresh_token: None,
            token_expiry: None,
        }
    }

    /// A token is usable when it is present and not past its expiry.
    pub fn is_authenticated(&self) -> bool {
        match (&self.access_token, self.token_expiry) {
            (Some(_), None) => true,
            (Some(_), Some(expiry)) => Timestamp::now() < expiry,
            (None, _) => false,
        }
    }

    /// Whether the token is missing, expired, or expires within `skew_secs`.
    pub fn needs_refresh(&self, skew_secs: i64) -> bool {
        match (&self.access_token, self.token_expiry) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(_), Some(expiry)) => {
                expiry.as_millisecond() - Timestamp::now().as_millisecond() <= skew_secs * 1000
            }
        }
    }

    /// Absolute expiry for a token good for `expires_in_secs` from now.
    /// Lifetimes beyond the representable range saturate rather than fail;
    /// providers occasionally report nonsense here.
    pub fn expiry_in(expires_in_secs: u64) -> Timestamp {
        let secs = i64::try_from(expires_in_secs).unwrap_or(i64::MAX);
        Timestamp::now()
            .checked_add(SignedDuration::from_secs(secs))
            .unwrap_or(Timestamp::MAX)
    }
}

/// Credential fields a host can configure ahead of authentication.
///
/// `None` fields are left as they are, so a host can hand over a client id
/// without clobbering a stored API key.
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_key: Option<String>,
}

/// Per-pass limits. The defaults are the free tier; [`ScannerLimits::premium`]
/// raises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerLimits {
    pub max_keywords: usize,
    pub max_results: usize,
}

impl Default for ScannerLimits {
    fn default() -> Self {
        ScannerLimits {
            max_keywords: 50,
            max_results: 100,
        }
    }
}

impl ScannerLimits {
    pub fn premium() -> Self {
        ScannerLimits {
            max_keywords: 500,
            max_results: 1000,
        }
    }
}

/// What to scan for and how often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub keywords: Vec<String>,
    /// Results with fewer watchers than this are dropped.
    pub min_viewers: u32,
    pub poll_interval_secs: u64,
    /// Per-platform participation. Platforms absent from the map are enabled.
    #[serde(default)]
    pub platforms: BTreeMap<Platform, bool>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            keywords: Vec::new(),
            min_viewers: 0,
            poll_interval_secs: 60,
            platforms: BTreeMap::new(),
        }
    }
}

impl ScanConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Whether `platform` participates in passes under this config.
    pub fn platform_enabled(&self, platform: Platform) -> bool {
        self.platforms.get(&platform).copied().unwrap_or(true)
    }

    /// Checks keyword shape and count, clamps the viewer floor and interval,
    /// and returns the normalized config ready for scanning.
    pub fn validated(mut self, limits: &ScannerLimits) -> Result<ScanConfig, ValidationError> {
        if self.keywords.is_empty() {
            return Err(ValidationError::NoKeywords);
        }
        if self.keywords.len() > limits.max_keywords {
            return Err(ValidationError::TooManyKeywords {
                got: self.keywords.len(),
                limit: limits.max_keywords,
            });
        }
        let mut seen = std::collections::HashSet::new();
        for keyword in &mut self.keywords {
            *keyword = keyword.trim().to_string();
            validate_keyword(keyword)?;
            if !seen.insert(keyword.clone()) {
                return Err(ValidationError::DuplicateKeyword(keyword.clone()));
            }
        }
        self.min_viewers = self.min_viewers.min(MAX_VIEWER_FLOOR);
        // A zero interval would mean a busy loop; one second is the floor.
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        Ok(self)
    }
}

/// A keyword must be 2 to 100 characters drawn from a conservative charset.
pub fn validate_keyword(keyword: &str) -> Result<(), ValidationError> {
    let len = keyword.chars().count();
    if len < MIN_KEYWORD_LEN {
        return Err(ValidationError::KeywordTooShort(keyword.to_string()));
    }
    if len > MAX_KEYWORD_LEN {
        return Err(ValidationError::KeywordTooLong(keyword.to_string()));
    }
    if !keyword.chars().all(keyword_char) {
        return Err(ValidationError::KeywordBadCharset(keyword.to_string()));
    }
    Ok(())
}

fn keyword_char(c: char) -> bool {
    c.is_alphanumeric()
        || c == ' '
        || matches!(c, '-' | '_' | '#' | '&' | '\'' | ',' | '.' | '!' | '?')
}
