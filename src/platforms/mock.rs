//! Deterministic synthetic results for unauthenticated adapters.
//!
//! Without credentials an adapter still has to produce schema-valid output
//! so the downstream UI and tests stay exercised. The shapes mirror what
//! each platform's real payload normalizes to; viewer counts and live flags
//! look randomized but are seeded per (platform, keyword), so the same
//! inputs always produce the same streams.

use std::hash::{DefaultHasher, Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{LiveStream, Platform};

const TWITCH_GAMES: [&str; 6] = [
    "Just Chatting",
    "League of Legends",
    "Valorant",
    "Minecraft",
    "GTA V",
    "Chess",
];

/// Synthetic streams for the given keywords, viewer floor already applied.
/// At least one stream is generated per keyword before filtering.
pub fn mock_streams(platform: Platform, keywords: &[String], min_viewers: u32) -> Vec<LiveStream> {
    let mut streams = Vec::new();
    for keyword in keywords {
        let mut rng = seeded_rng(platform, keyword);
        let count = rng.random_range(1..=3);
        for i in 0..count {
            streams.push(mock_stream(platform, keyword, i, &mut rng));
        }
    }
    streams.retain(|s| s.viewer_count >= min_viewers);
    streams
}

fn seeded_rng(platform: Platform, keyword: &str) -> StdRng {
    let mut hasher = DefaultHasher::new();
    platform.as_str().hash(&mut hasher);
    keyword.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

fn mock_stream(platform: Platform, keyword: &str, i: usize, rng: &mut StdRng) -> LiveStream {
    let lower = keyword.to_lowercase().replace(' ', "_");
    match platform {
        Platform::Twitch => {
            let game = TWITCH_GAMES[rng.random_range(0..TWITCH_GAMES.len())];
            let username = format!("streamer_{lower}_{i}");
            LiveStream {
                platform,
                display_name: format!("{keyword}Master{i}"),
                title: format!("{keyword} - {game} Stream!"),
                viewer_count: rng.random_range(50..5050),
                url: format!("https://twitch.tv/{username}"),
                thumbnail_url: None,
                is_live: rng.random_bool(0.9),
                matched_keyword: keyword.to_string(),
                game: Some(game.to_string()),
                username,
            }
        }
        Platform::YouTube => LiveStream {
            platform,
            username: format!("{keyword}Channel{i}"),
            display_name: format!("{keyword} Live {i}"),
            title: format!("{} LIVE: {keyword} - Amazing Content!", platform.glyph()),
            viewer_count: rng.random_range(100..3100),
            url: format!("https://youtube.com/watch?v=demo{i}"),
            thumbnail_url: None,
            is_live: true,
            matched_keyword: keyword.to_string(),
            game: None,
        },
        Platform::Kick => {
            let username = format!("{lower}_kick_{i}");
            LiveStream {
                platform,
                display_name: format!("{keyword}Streamer{i}"),
                title: format!("{keyword} Stream on Kick!"),
                viewer_count: rng.random_range(20..1020),
                url: format!("https://kick.com/{username}"),
                thumbnail_url: None,
                is_live: true,
                matched_keyword: keyword.to_string(),
                game: None,
                username,
            }
        }
        Platform::TikTok => {
            let username = format!("@{lower}{i}");
            LiveStream {
                platform,
                display_name: username.clone(),
                title: format!("{keyword} - Live Now!"),
                viewer_count: rng.random_range(50..2050),
                url: format!("https://tiktok.com/{username}/live"),
                thumbnail_url: None,
                is_live: rng.random_bool(0.8),
                matched_keyword: keyword.to_string(),
                game: None,
                username,
            }
        }
    }
}
