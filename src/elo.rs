use std::collections::HashMap;

use crate::historical_dataset::StoredMatch;

#[derive(Debug, Clone, Copy)]
pub struct EloConfig {
    pub k: f64,
    pub home_adv_pts: f64,
    pub initial: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            home_adv_pts: 60.0,
            initial: 1500.0,
        }
    }
}

/// Running ratings, updated one finished match at a time.
#[derive(Debug, Clone, Default)]
pub struct EloTable {
    cfg: EloConfig,
    ratings: HashMap<String, f64>,
}

impl EloTable {
    pub fn new(cfg: EloConfig) -> Self {
        Self {
            cfg,
            ratings: HashMap::new(),
        }
    }

    pub fn rating(&self, team: &str) -> f64 {
        self.ratings.get(team).copied().unwrap_or(self.cfg.initial)
    }

    /// Home win expectancy including home advantage.
    pub fn home_expectancy(&self, home: &str, away: &str) -> f64 {
        expected_score(self.rating(home) + self.cfg.home_adv_pts, self.rating(away))
    }

    pub fn update(&mut self, m: &StoredMatch) {
        let eh = self.rating(&m.home_team);
        let ea = self.rating(&m.away_team);
        let expected_home = expected_score(eh + self.cfg.home_adv_pts, ea);
        let s_home = match m.outcome() {
            'H' => 1.0,
            'A' => 0.0,
            _ => 0.5,
        };
        let delta = self.cfg.k * (s_home - expected_home);
        self.ratings.insert(m.home_team.clone(), eh + delta);
        self.ratings.insert(m.away_team.clone(), ea - delta);
    }
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / 400.0))
}
