mod common;

use common::{ScriptedTransport, Step};
use scoresaber_gate::scoresaber::{ScoreOrder, ScoreSaberApi};
use scoresaber_gate::{AbsenceReason, Fetcher, Outcome};

const PLAYER: &str = "76561198333869741";

fn api(transport: &ScriptedTransport) -> ScoreSaberApi {
    ScoreSaberApi::new(Fetcher::builder().transport(transport.clone()).build().unwrap())
}

fn player_info_json() -> &'static str {
    r#"{
        "playerId": "76561198333869741",
        "playerName": "Eris",
        "avatar": "/api/static/avatars/76561198333869741.jpg",
        "rank": 120,
        "countryRank": 3,
        "pp": 11234.5,
        "country": "BE",
        "role": null,
        "badges": [{"image": "badge.png", "description": "Supporter"}],
        "history": "130,125,120",
        "permissions": 0,
        "inactive": 0,
        "banned": 0
    }"#
}

fn score_json(rank: u32) -> String {
    format!(
        r#"{{"rank": {rank}, "scoreId": {rank}, "score": 500000, "unmodififiedScore": 500000,
            "mods": "", "pp": 100.0, "weight": 0.9, "timeSet": "2021-05-01T12:00:00Z",
            "leaderboardId": 1, "songHash": "HASH{rank}", "songName": "Song", "songSubName": "",
            "songAuthorName": "Artist", "levelAuthorName": "Mapper", "difficulty": 7,
            "difficultyRaw": "_Expert_SoloStandard", "maxScore": 0}}"#,
        rank = rank
    )
}

fn page_json(ranks: std::ops::RangeInclusive<u32>) -> String {
    let scores: Vec<String> = ranks.map(score_json).collect();
    format!(r#"{{"scores": [{}]}}"#, scores.join(","))
}

#[tokio::test]
async fn full_profile_decodes() {
    let transport = ScriptedTransport::new();
    let body = format!(
        r#"{{"playerInfo": {}, "scoreStats": {{"totalScore": 1, "totalRankedScore": 1,
            "averageRankedAccuracy": 93.2, "totalPlayCount": 10, "rankedPlayCount": 8}}}}"#,
        player_info_json()
    );
    transport.push(&format!("player/{}/full", PLAYER), Step::json(&body));
    let api = api(&transport);

    let profile = api.full_profile(PLAYER).await.into_option().unwrap();

    assert_eq!(profile.player_info.player_name, "Eris");
    assert_eq!(profile.player_info.badges.len(), 1);
    assert_eq!(profile.player_info.rank_history(), vec![130, 125, 120]);
    assert_eq!(profile.score_stats.ranked_play_count, 8);
}

#[tokio::test]
async fn unknown_player_is_absent() {
    let transport = ScriptedTransport::new();
    let api = api(&transport);

    let outcome = api.basic_profile("0").await;

    assert!(matches!(outcome, Outcome::Absent(AbsenceReason::Status(_))));
    assert_eq!(transport.paths(), vec!["player/0/basic"]);
}

#[tokio::test]
async fn score_lists_use_their_own_paths() {
    let transport = ScriptedTransport::new();
    transport
        .push(&format!("player/{}/scores/recent/1", PLAYER), Step::json(&page_json(1..=8)))
        .push(&format!("player/{}/scores/top/3", PLAYER), Step::json(&page_json(17..=24)));
    let api = api(&transport);

    let recent = api.recent_scores(PLAYER, 1).await.into_option().unwrap();
    let top = api.top_scores(PLAYER, 3).await.into_option().unwrap();

    assert_eq!(recent.scores.len(), 8);
    assert_eq!(top.scores[0].rank, 17);
    assert_eq!(top.scores[0].accuracy(), None);
}

#[tokio::test]
async fn nth_score_reads_the_right_page_and_slot() {
    let transport = ScriptedTransport::new();
    transport.push(&format!("player/{}/scores/top/2", PLAYER), Step::json(&page_json(9..=11)));
    let api = api(&transport);

    let tenth = api.nth_score(PLAYER, ScoreOrder::Top, 10).await.unwrap();
    assert_eq!(tenth.into_option().flatten().map(|s| s.song_hash), Some("HASH10".to_string()));

    transport.push(&format!("player/{}/scores/top/2", PLAYER), Step::json(&page_json(9..=11)));
    let missing = api.nth_score(PLAYER, ScoreOrder::Top, 15).await.unwrap();
    assert_eq!(missing.into_option(), Some(None));

    assert!(api.nth_score(PLAYER, ScoreOrder::Top, 0).await.is_err());
}

#[tokio::test]
async fn search_validates_before_requesting() {
    let transport = ScriptedTransport::new();
    transport.push(
        "players/by-name/Eris",
        Step::json(
            r#"{"players": [{"playerId": "1", "playerName": "Eris", "avatar": "", "rank": 1,
                "pp": 1.0, "country": "BE", "difference": -2, "history": ""}]}"#,
        ),
    );
    let api = api(&transport);

    assert!(api.search_players("abc").await.is_err());
    assert!(api.search_players("   \t   ").await.is_err());
    assert!(api.search_players(&"x".repeat(32)).await.is_err());
    assert!(transport.seen().is_empty());

    let page = api.search_players("Eris").await.unwrap().into_option().unwrap();
    assert_eq!(page.players[0].difference, -2);
}

#[tokio::test]
async fn images_take_the_byte_path() {
    let transport = ScriptedTransport::new();
    transport
        .push("static/covers/HASH1.png", Step::bytes(b"cover"))
        .push("static/avatars/76561198333869741.jpg", Step::bytes(b"avatar"));
    let api = api(&transport);

    assert_eq!(&api.cover_image("HASH1").await.unwrap()[..], b"cover");
    let avatar = api.avatar("/api/static/avatars/76561198333869741.jpg").await.unwrap();
    assert_eq!(&avatar[..], b"avatar");
}

#[tokio::test]
async fn absolute_avatar_url_is_read_from_the_api_host() {
    let transport = ScriptedTransport::new();
    transport.push("static/avatars/1.jpg", Step::bytes(b"avatar"));
    let api = api(&transport);

    let avatar = api.avatar("https://cdn.example.org/api/static/avatars/1.jpg").await.unwrap();

    assert_eq!(&avatar[..], b"avatar");
    assert_eq!(transport.paths(), vec!["static/avatars/1.jpg"]);
}
