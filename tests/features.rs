use chrono::{Duration, NaiveDate};

use goalcast::features::{
    FootballFeatureConfig, TENNIS_TARGET, UNKNOWN_RANK, build_football_features, build_tennis_features,
};
use goalcast::historical_dataset::{
    StoredMatch, StoredTennisMatch, load_finished_matches, load_tennis_matches, open_in_memory, upsert_matches,
    upsert_tennis_matches,
};

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Duration::days(offset)
}

/// A and B alternate home; home side scores `i % 4`, away side always 1.
fn alternating_matches(n: usize) -> Vec<StoredMatch> {
    (0..n)
        .map(|i| {
            let (home, away) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
            StoredMatch {
                match_id: format!("m{i:02}"),
                league: "E0".to_string(),
                match_date: day(i as i64),
                home_team: home.to_string(),
                away_team: away.to_string(),
                home_goals: (i % 4) as u32,
                away_goals: 1,
            }
        })
        .collect()
}

#[test]
fn football_features_come_from_earlier_matches_only() {
    let mut conn = open_in_memory().unwrap();
    upsert_matches(&mut conn, &alternating_matches(24)).unwrap();
    let matches = load_finished_matches(&conn, Some("E0")).unwrap();

    let samples = build_football_features(&matches, FootballFeatureConfig::default());
    assert_eq!(samples.len(), 4);
    let s = &samples[0];
    assert_eq!(s.id, "m20");

    let f = |name: &str| s.features[name];
    assert!((f("home_goals_scored_last_3") - 4.0 / 3.0).abs() < 1e-12);
    assert!((f("away_goals_scored_last_3") - 1.0).abs() < 1e-12);
    assert!((f("away_goals_conceded_last_3") - 4.0 / 3.0).abs() < 1e-12);
    assert_eq!(f("h2h_matches"), 5.0);
    assert!((f("h2h_avg_goals") - 2.8).abs() < 1e-12);
    assert!((f("h2h_over_2_5_pct") - 0.6).abs() < 1e-12);
    assert!(
        (f("expected_total_goals") - f("expected_home_goals") - f("expected_away_goals")).abs() < 1e-12
    );
    assert_eq!(f("elo_diff"), f("elo_home") - f("elo_away"));

    assert_eq!(s.target("away_win"), Some(1));
    assert_eq!(s.target("home_win"), Some(0));
    assert_eq!(s.target("btts"), Some(0));
    assert_eq!(s.target("over_2_5"), Some(0));
}

#[test]
fn same_day_results_do_not_leak_into_each_other() {
    let mut matches = alternating_matches(21);
    matches.push(StoredMatch {
        match_id: "m20b".to_string(),
        league: "E0".to_string(),
        match_date: day(20),
        home_team: "A".to_string(),
        away_team: "C".to_string(),
        home_goals: 5,
        away_goals: 0,
    });

    let samples = build_football_features(&matches, FootballFeatureConfig::default());
    assert_eq!(samples.len(), 2);
    let (first, second) = (&samples[0], &samples[1]);
    assert_eq!(first.features["elo_home"], second.features["elo_home"]);
    assert_eq!(
        first.features["home_goals_scored_last_10"],
        second.features["home_goals_scored_last_10"]
    );
    assert_eq!(second.features["h2h_matches"], 0.0);
}

#[test]
fn calendar_features_use_monday_as_zero() {
    let samples = build_football_features(&alternating_matches(26), FootballFeatureConfig::default());
    for s in &samples {
        let dow = s.features["day_of_week"];
        assert!((0.0..=6.0).contains(&dow));
        assert_eq!(s.features["is_weekend"], if dow >= 5.0 { 1.0 } else { 0.0 });
        assert_eq!(s.features["month"], 1.0);
        assert_eq!(s.features["is_holiday_season"], 1.0);
    }
    // 2023-01-02 is a Monday, so match 21 falls on a Monday too.
    assert_eq!(samples[1].features["day_of_week"], 0.0);
}

fn tennis_matches(n: usize) -> Vec<StoredTennisMatch> {
    (0..n)
        .map(|i| StoredTennisMatch {
            match_id: format!("t{i:02}"),
            tournament: "Open".to_string(),
            level: Some(if i % 2 == 0 { "G" } else { "A" }.to_string()),
            surface: Some("Clay".to_string()),
            match_date: day(i as i64),
            winner: if i % 3 == 0 { "Q" } else { "P" }.to_string(),
            loser: if i % 3 == 0 { "P" } else { "Q" }.to_string(),
            winner_rank: Some(3),
            loser_rank: if i == 0 { None } else { Some(8) },
        })
        .collect()
}

#[test]
fn tennis_slots_are_randomised_but_reproducible() {
    let mut conn = open_in_memory().unwrap();
    upsert_tennis_matches(&mut conn, &tennis_matches(40)).unwrap();
    let matches = load_tennis_matches(&conn).unwrap();

    let a = build_tennis_features(&matches, 7);
    let b = build_tennis_features(&matches, 7);
    assert_eq!(a, b);
    assert_eq!(a.len(), 40);

    let wins = a.iter().filter(|s| s.target(TENNIS_TARGET) == Some(1)).count();
    assert!(wins > 0 && wins < 40);
}

#[test]
fn tennis_history_counts_prior_meetings() {
    let samples = build_tennis_features(&tennis_matches(12), 3);
    let first = &samples[0];
    assert_eq!(first.features["h2h_total"], 0.0);
    assert_eq!(first.features["player1_surface_winrate"], 0.5);
    assert!(
        first.features["player1_rank"] == UNKNOWN_RANK || first.features["player2_rank"] == UNKNOWN_RANK
    );
    assert_eq!(first.features["rank_difference"], 0.0);
    assert_eq!(first.features["is_clay"], 1.0);
    assert_eq!(first.features["is_grand_slam"], 1.0);

    for (k, s) in samples.iter().enumerate() {
        assert_eq!(s.features["h2h_total"], k as f64);
        let surface_total = s.features["player1_surface_total"];
        assert_eq!(surface_total, k as f64);
        assert!(s.features["player1_recent_wins"] + s.features["player1_recent_losses"] <= 10.0);
    }
}
