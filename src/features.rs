use std::collections::HashMap;

use chrono::Datelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::elo::{EloConfig, EloTable};
use crate::historical_dataset::{StoredMatch, StoredTennisMatch};
use crate::sample::Sample;

pub const MIN_PRIOR_MATCHES: usize = 20;
pub const ROLLING_WINDOWS: [usize; 3] = [3, 5, 10];
pub const H2H_WINDOW: usize = 5;
pub const FORM_WINDOW: usize = 10;
pub const UNKNOWN_RANK: f64 = 999.0;

pub const FOOTBALL_TARGETS: [&str; 5] = ["over_2_5", "btts", "home_win", "draw", "away_win"];
pub const TENNIS_TARGET: &str = "player1_win";

#[derive(Debug, Clone, Copy)]
pub struct FootballFeatureConfig {
    /// Matches that must already be in the store before a match becomes a sample.
    pub min_prior_matches: usize,
    pub elo: EloConfig,
}

impl Default for FootballFeatureConfig {
    fn default() -> Self {
        Self {
            min_prior_matches: MIN_PRIOR_MATCHES,
            elo: EloConfig::default(),
        }
    }
}

/// (scored, conceded) per match, oldest first.
type GoalLog = Vec<(f64, f64)>;

fn rolling_mean(log: &[(f64, f64)], window: usize, pick: fn(&(f64, f64)) -> f64) -> f64 {
    let tail = &log[log.len().saturating_sub(window)..];
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().map(pick).sum::<f64>() / tail.len() as f64
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// One sample per match, using only matches dated strictly before it.
///
/// Matches are replayed day by day: every match on a given date is featurized
/// before any of that day's results enter the rolling logs or Elo ratings.
pub fn build_football_features(matches: &[StoredMatch], cfg: FootballFeatureConfig) -> Vec<Sample> {
    let mut ordered: Vec<&StoredMatch> = matches.iter().collect();
    ordered.sort_by(|a, b| {
        a.match_date
            .cmp(&b.match_date)
            .then_with(|| a.match_id.cmp(&b.match_id))
    });

    let mut home_logs: HashMap<&str, GoalLog> = HashMap::new();
    let mut away_logs: HashMap<&str, GoalLog> = HashMap::new();
    let mut h2h: HashMap<(String, String), Vec<u32>> = HashMap::new();
    let mut elo = EloTable::new(cfg.elo);
    let mut samples = Vec::new();

    let mut start = 0usize;
    while start < ordered.len() {
        let date = ordered[start].match_date;
        let end = ordered[start..]
            .iter()
            .position(|m| m.match_date != date)
            .map_or(ordered.len(), |off| start + off);
        let day = &ordered[start..end];

        if start >= cfg.min_prior_matches {
            for m in day {
                let empty = GoalLog::new();
                let home_log = home_logs.get(m.home_team.as_str()).unwrap_or(&empty);
                let away_log = away_logs.get(m.away_team.as_str()).unwrap_or(&empty);
                let meetings = h2h
                    .get(&pair_key(&m.home_team, &m.away_team))
                    .map(|v| &v[v.len().saturating_sub(H2H_WINDOW)..])
                    .unwrap_or(&[]);
                samples.push(football_sample(m, home_log, away_log, meetings, &elo));
            }
        }

        for m in day {
            let (hg, ag) = (f64::from(m.home_goals), f64::from(m.away_goals));
            home_logs.entry(m.home_team.as_str()).or_default().push((hg, ag));
            away_logs.entry(m.away_team.as_str()).or_default().push((ag, hg));
            h2h.entry(pair_key(&m.home_team, &m.away_team))
                .or_default()
                .push(m.total_goals());
            elo.update(m);
        }
        start = end;
    }
    samples
}

fn football_sample(
    m: &StoredMatch,
    home_log: &[(f64, f64)],
    away_log: &[(f64, f64)],
    meetings: &[u32],
    elo: &EloTable,
) -> Sample {
    let mut s = Sample::new(m.match_id.clone(), m.match_date);

    for w in ROLLING_WINDOWS {
        s = s
            .with_feature(&format!("home_goals_scored_last_{w}"), rolling_mean(home_log, w, |e| e.0))
            .with_feature(&format!("home_goals_conceded_last_{w}"), rolling_mean(home_log, w, |e| e.1))
            .with_feature(&format!("away_goals_scored_last_{w}"), rolling_mean(away_log, w, |e| e.0))
            .with_feature(&format!("away_goals_conceded_last_{w}"), rolling_mean(away_log, w, |e| e.1));
    }

    let n = meetings.len() as f64;
    let (h2h_avg, h2h_over) = if meetings.is_empty() {
        (0.0, 0.0)
    } else {
        (
            meetings.iter().map(|g| f64::from(*g)).sum::<f64>() / n,
            meetings.iter().filter(|g| **g > 2).count() as f64 / n,
        )
    };

    let weekday = m.match_date.weekday().num_days_from_monday();
    let month = m.match_date.month();

    let expected_home = (rolling_mean(home_log, 5, |e| e.0) + rolling_mean(away_log, 5, |e| e.1)) / 2.0;
    let expected_away = (rolling_mean(away_log, 5, |e| e.0) + rolling_mean(home_log, 5, |e| e.1)) / 2.0;

    let elo_home = elo.rating(&m.home_team);
    let elo_away = elo.rating(&m.away_team);

    s = s
        .with_feature("h2h_matches", n)
        .with_feature("h2h_avg_goals", h2h_avg)
        .with_feature("h2h_over_2_5_pct", h2h_over)
        .with_feature("day_of_week", f64::from(weekday))
        .with_feature("is_weekend", if weekday >= 5 { 1.0 } else { 0.0 })
        .with_feature("month", f64::from(month))
        .with_feature("is_holiday_season", if month == 12 || month == 1 { 1.0 } else { 0.0 })
        .with_feature("expected_home_goals", expected_home)
        .with_feature("expected_away_goals", expected_away)
        .with_feature("expected_total_goals", expected_home + expected_away)
        .with_feature("elo_home", elo_home)
        .with_feature("elo_away", elo_away)
        .with_feature("elo_diff", elo_home - elo_away)
        .with_feature("elo_home_expectancy", elo.home_expectancy(&m.home_team, &m.away_team));

    let outcome = m.outcome();
    s.with_target("over_2_5", u8::from(m.total_goals() > 2))
        .with_target("btts", u8::from(m.home_goals > 0 && m.away_goals > 0))
        .with_target("home_win", u8::from(outcome == 'H'))
        .with_target("draw", u8::from(outcome == 'D'))
        .with_target("away_win", u8::from(outcome == 'A'))
}

#[derive(Debug, Clone)]
struct PlayedMatch {
    won: bool,
    opponent: String,
    surface: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SurfaceRecord {
    wins: usize,
    total: usize,
}

impl SurfaceRecord {
    fn win_rate(&self) -> f64 {
        if self.total == 0 {
            0.5
        } else {
            self.wins as f64 / self.total as f64
        }
    }
}

fn same_surface(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

fn form(history: &[PlayedMatch]) -> (usize, usize) {
    let recent = &history[history.len().saturating_sub(FORM_WINDOW)..];
    let wins = recent.iter().filter(|p| p.won).count();
    (wins, recent.len() - wins)
}

fn surface_record(history: &[PlayedMatch], surface: Option<&str>) -> SurfaceRecord {
    let mut rec = SurfaceRecord::default();
    for played in history {
        if same_surface(played.surface.as_deref(), surface) {
            rec.total += 1;
            rec.wins += usize::from(played.won);
        }
    }
    rec
}

fn h2h_wins(history: &[PlayedMatch], opponent: &str) -> usize {
    history
        .iter()
        .filter(|p| p.won && p.opponent == opponent)
        .count()
}

/// One sample per match with the winner placed in a random player slot, so
/// `player1_win` is not constant. Only strictly earlier dates feed features.
pub fn build_tennis_features(matches: &[StoredTennisMatch], seed: u64) -> Vec<Sample> {
    let mut ordered: Vec<&StoredTennisMatch> = matches.iter().collect();
    ordered.sort_by(|a, b| {
        a.match_date
            .cmp(&b.match_date)
            .then_with(|| a.match_id.cmp(&b.match_id))
    });

    let mut rng = StdRng::seed_from_u64(seed);
    let mut history: HashMap<&str, Vec<PlayedMatch>> = HashMap::new();
    let mut samples = Vec::with_capacity(ordered.len());

    let mut start = 0usize;
    while start < ordered.len() {
        let date = ordered[start].match_date;
        let end = ordered[start..]
            .iter()
            .position(|m| m.match_date != date)
            .map_or(ordered.len(), |off| start + off);
        let day = &ordered[start..end];

        for m in day {
            let winner_first = rng.gen_bool(0.5);
            samples.push(tennis_sample(m, winner_first, &history));
        }
        for m in day {
            history.entry(m.winner.as_str()).or_default().push(PlayedMatch {
                won: true,
                opponent: m.loser.clone(),
                surface: m.surface.clone(),
            });
            history.entry(m.loser.as_str()).or_default().push(PlayedMatch {
                won: false,
                opponent: m.winner.clone(),
                surface: m.surface.clone(),
            });
        }
        start = end;
    }
    samples
}

fn tennis_sample(
    m: &StoredTennisMatch,
    winner_first: bool,
    history: &HashMap<&str, Vec<PlayedMatch>>,
) -> Sample {
    let (p1, p2, p1_rank, p2_rank) = if winner_first {
        (&m.winner, &m.loser, m.winner_rank, m.loser_rank)
    } else {
        (&m.loser, &m.winner, m.loser_rank, m.winner_rank)
    };
    let empty = Vec::new();
    let h1 = history.get(p1.as_str()).unwrap_or(&empty);
    let h2 = history.get(p2.as_str()).unwrap_or(&empty);

    let rank = |r: Option<u32>| r.map_or(UNKNOWN_RANK, f64::from);
    let rank_difference = match (p1_rank, p2_rank) {
        (Some(a), Some(b)) => f64::from(a) - f64::from(b),
        _ => 0.0,
    };

    let (w1, l1) = form(h1);
    let (w2, l2) = form(h2);
    let (form1, form2) = (3.0 * w1 as f64, 3.0 * w2 as f64);
    let (h2h1, h2h2) = (h2h_wins(h1, p2), h2h_wins(h2, p1));
    let surface = m.surface.as_deref();
    let (s1, s2) = (surface_record(h1, surface), surface_record(h2, surface));
    let is_surface = |name: &str| if same_surface(surface, Some(name)) { 1.0 } else { 0.0 };
    let level = m.level.as_deref().unwrap_or_default();

    Sample::new(m.match_id.clone(), m.match_date)
        .with_feature("player1_rank", rank(p1_rank))
        .with_feature("player2_rank", rank(p2_rank))
        .with_feature("rank_difference", rank_difference)
        .with_feature("player1_recent_wins", w1 as f64)
        .with_feature("player1_recent_losses", l1 as f64)
        .with_feature("player1_form_points", form1)
        .with_feature("player2_recent_wins", w2 as f64)
        .with_feature("player2_recent_losses", l2 as f64)
        .with_feature("player2_form_points", form2)
        .with_feature("form_difference", form1 - form2)
        .with_feature("h2h_player1_wins", h2h1 as f64)
        .with_feature("h2h_player2_wins", h2h2 as f64)
        .with_feature("h2h_total", (h2h1 + h2h2) as f64)
        .with_feature("player1_surface_wins", s1.wins as f64)
        .with_feature("player1_surface_total", s1.total as f64)
        .with_feature("player1_surface_winrate", s1.win_rate())
        .with_feature("player2_surface_wins", s2.wins as f64)
        .with_feature("player2_surface_total", s2.total as f64)
        .with_feature("player2_surface_winrate", s2.win_rate())
        .with_feature("surface_winrate_diff", s1.win_rate() - s2.win_rate())
        .with_feature("is_hard", is_surface("Hard"))
        .with_feature("is_clay", is_surface("Clay"))
        .with_feature("is_grass", is_surface("Grass"))
        .with_feature("is_grand_slam", if level == "G" { 1.0 } else { 0.0 })
        .with_feature("is_masters", if level == "M" { 1.0 } else { 0.0 })
        .with_target(TENNIS_TARGET, u8::from(winner_first))
}
