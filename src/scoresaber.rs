//! Typed endpoints of the ScoreSaber ranking API.
//!
//! Thin wrappers over [`Fetcher`]: each method only builds a path and picks the response model.
//! Profile, score and search calls take the JSON path and degrade to [`Outcome::Absent`]; cover
//! art and avatars take the byte path and propagate failures.

use crate::error::{FetchError, InvalidQuery};
use crate::fetcher::{Fetcher, Outcome};
use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use reqwest::Url;
use serde::Deserialize;

/// Scores per page on the score list endpoints.
pub const PLAYS_PER_PAGE: u32 = 8;

/// Page (1-based) and index within that page (0-based) of the `nth` score, counting from 1.
///
/// Returns `None` for `nth == 0`.
///
/// ```rust
/// use scoresaber_gate::scoresaber::score_page_position;
///
/// assert_eq!(score_page_position(1), Some((1, 0)));
/// assert_eq!(score_page_position(8), Some((1, 7)));
/// assert_eq!(score_page_position(9), Some((2, 0)));
/// ```
pub fn score_page_position(nth: u32) -> Option<(u32, usize)> {
    if nth == 0 {
        return None;
    }
    let page = nth.div_ceil(PLAYS_PER_PAGE);
    let index = ((nth - 1) % PLAYS_PER_PAGE) as usize;
    Some((page, index))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub player_id: String,
    pub player_name: String,
    /// Path of the avatar image, relative to the host.
    pub avatar: String,
    pub rank: u32,
    pub country_rank: u32,
    pub pp: f64,
    pub country: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub badges: Vec<Badge>,
    /// Rank history as a comma separated list, oldest first.
    #[serde(default)]
    pub history: String,
    #[serde(default)]
    pub permissions: u32,
    #[serde(default)]
    pub inactive: u32,
    #[serde(default)]
    pub banned: u32,
}

impl PlayerInfo {
    /// Parsed rank history; entries that are not numbers are skipped.
    pub fn rank_history(&self) -> Vec<u32> {
        self.history.split(',').filter_map(|entry| entry.trim().parse().ok()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Badge {
    pub image: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreStats {
    pub total_score: u64,
    pub total_ranked_score: u64,
    pub average_ranked_accuracy: f64,
    pub total_play_count: u32,
    pub ranked_play_count: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicProfile {
    pub player_info: PlayerInfo,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullProfile {
    pub player_info: PlayerInfo,
    pub score_stats: ScoreStats,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongScore {
    pub rank: u32,
    pub score_id: u64,
    pub score: u64,
    // The upstream field name carries a typo.
    #[serde(rename = "unmodififiedScore", alias = "unmodifiedScore")]
    pub unmodified_score: u64,
    #[serde(default)]
    pub mods: String,
    pub pp: f64,
    pub weight: f64,
    pub time_set: DateTime<FixedOffset>,
    pub leaderboard_id: u64,
    pub song_hash: String,
    pub song_name: String,
    #[serde(default)]
    pub song_sub_name: String,
    pub song_author_name: String,
    pub level_author_name: String,
    pub difficulty: u32,
    /// e.g. `_ExpertPlus_SoloStandard`
    pub difficulty_raw: String,
    /// Zero when the upstream does not know the map's maximum.
    #[serde(default)]
    pub max_score: u64,
}

impl SongScore {
    /// Accuracy in percent, or `None` when the maximum score is unknown.
    pub fn accuracy(&self) -> Option<f64> {
        (self.max_score > 0).then(|| self.unmodified_score as f64 * 100.0 / self.max_score as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoresPage {
    pub scores: Vec<SongScore>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub player_id: String,
    pub player_name: String,
    pub avatar: String,
    pub rank: u32,
    pub pp: f64,
    pub country: String,
    #[serde(default)]
    pub difference: i64,
    #[serde(default)]
    pub history: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayersPage {
    pub players: Vec<PlayerSummary>,
}

/// Which score list of a player to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrder {
    Recent,
    Top,
}

impl ScoreOrder {
    fn segment(self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Top => "top",
        }
    }
}

/// Typed client for the ranking API.
#[derive(Debug, Clone)]
pub struct ScoreSaberApi {
    fetcher: Fetcher,
}

impl ScoreSaberApi {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub async fn basic_profile(&self, player_id: &str) -> Outcome<BasicProfile> {
        self.fetcher.fetch_typed(&format!("player/{}/basic", player_id)).await
    }

    pub async fn full_profile(&self, player_id: &str) -> Outcome<FullProfile> {
        self.fetcher.fetch_typed(&format!("player/{}/full", player_id)).await
    }

    pub async fn recent_scores(&self, player_id: &str, page: u32) -> Outcome<ScoresPage> {
        self.scores(player_id, ScoreOrder::Recent, page).await
    }

    pub async fn top_scores(&self, player_id: &str, page: u32) -> Outcome<ScoresPage> {
        self.scores(player_id, ScoreOrder::Top, page).await
    }

    pub async fn scores(&self, player_id: &str, order: ScoreOrder, page: u32) -> Outcome<ScoresPage> {
        let path = format!("player/{}/scores/{}/{}", player_id, order.segment(), page);
        self.fetcher.fetch_typed(&path).await
    }

    /// The `nth` score (1-based) of a list. `Decoded(None)` when the player has fewer scores.
    pub async fn nth_score(
        &self,
        player_id: &str,
        order: ScoreOrder,
        nth: u32,
    ) -> Result<Outcome<Option<SongScore>>, InvalidQuery> {
        let (page, index) = score_page_position(nth)
            .ok_or_else(|| InvalidQuery("score positions start at 1".to_string()))?;
        let outcome = self.scores(player_id, order, page).await;
        Ok(outcome.map(|page| page.scores.into_iter().nth(index)))
    }

    /// Search players by name.
    ///
    /// # Errors
    /// Rejects the query without a request unless the name is not blank and strictly between 3
    /// and 32 characters long.
    pub async fn search_players(&self, name: &str) -> Result<Outcome<PlayersPage>, InvalidQuery> {
        validate_search_name(name)?;
        Ok(self.fetcher.fetch_typed(&format!("players/by-name/{}", name)).await)
    }

    /// Cover art of a song by its hash.
    pub async fn cover_image(&self, song_hash: &str) -> Result<Bytes, FetchError> {
        self.fetcher.fetch_bytes(&format!("static/covers/{}.png", song_hash)).await
    }

    /// Avatar image, given the `avatar` value of a profile.
    pub async fn avatar(&self, avatar: &str) -> Result<Bytes, FetchError> {
        self.fetcher.fetch_bytes(&avatar_path(avatar)).await
    }
}

fn validate_search_name(name: &str) -> Result<(), InvalidQuery> {
    let len = name.chars().count();
    if name.trim().is_empty() || len <= 3 || len >= 32 {
        return Err(InvalidQuery(
            "player name must be between 3 and 32 characters (bounds not inclusive)".to_string(),
        ));
    }
    Ok(())
}

/// Profiles report avatars as `/api/static/avatars/<file>`; requests are already rooted at the
/// API, so that prefix is dropped. An absolute URL is reduced to its path, so avatars are always
/// read from the API host.
fn avatar_path(avatar: &str) -> String {
    let path = match Url::parse(avatar) {
        Ok(url) => url.path().to_string(),
        Err(_) => avatar.to_string(),
    };
    let relative = path.trim_start_matches('/');
    relative.strip_prefix("api/").unwrap_or(relative).to_string()
}
