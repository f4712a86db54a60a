use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Names that are the outcome itself or are computed from it.
pub const DEFAULT_TARGET_DENYLIST: &[&str] = &[
    "total_goals",
    "goals",
    "score",
    "final_score",
    "result",
    "ftr",
    "fthg",
    "ftag",
    "over_1_5",
    "over_2_5",
    "over_3_5",
    "under_1_5",
    "under_2_5",
    "under_3_5",
    "btts",
    "home_win",
    "draw",
    "away_win",
    "winner",
    "loser",
    "player1_win",
    "player2_win",
];

/// Bookkeeping columns with no predictive meaning; dropped but not counted as leakage.
pub const IDENTIFIER_COLUMNS: &[&str] = &["match_id", "date", "league"];

static DEFAULT_DENYLIST_LOWER: Lazy<HashSet<String>> = Lazy::new(|| {
    DEFAULT_TARGET_DENYLIST
        .iter()
        .map(|s| s.to_ascii_lowercase())
        .collect()
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeakageReport {
    /// Remaining feature columns, in input order.
    pub features: Vec<String>,
    /// Denylisted columns that were present and removed.
    pub leaked: Vec<String>,
    /// Identifier columns that were present and removed.
    pub identifiers: Vec<String>,
}

impl LeakageReport {
    pub fn has_leakage(&self) -> bool {
        !self.leaked.is_empty()
    }
}

/// Extra denylist entries on top of the defaults: target names and caller additions.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    extra: HashSet<String>,
}

impl Denylist {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        list.extend(extra);
        list
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let lowered = name.as_ref().trim().to_ascii_lowercase();
            if !lowered.is_empty() {
                self.extra.insert(lowered);
            }
        }
    }

    /// Case-insensitive exact match against defaults and extras.
    pub fn contains(&self, column: &str) -> bool {
        let lowered = column.to_ascii_lowercase();
        DEFAULT_DENYLIST_LOWER.contains(&lowered) || self.extra.contains(&lowered)
    }
}

/// Splits `columns` into usable features, leaked target-derived columns and identifiers.
///
/// Only exact names are caught; a renamed copy of the outcome passes through.
pub fn guard_columns(columns: &[String], denylist: &Denylist) -> LeakageReport {
    let mut report = LeakageReport::default();
    for column in columns {
        let lowered = column.to_ascii_lowercase();
        if denylist.contains(column) {
            report.leaked.push(column.clone());
        } else if IDENTIFIER_COLUMNS.contains(&lowered.as_str()) {
            report.identifiers.push(column.clone());
        } else {
            report.features.push(column.clone());
        }
    }
    report
}
