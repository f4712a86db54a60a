use goalcast::leakage::{DEFAULT_TARGET_DENYLIST, Denylist, guard_columns};

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn every_default_entry_is_removed() {
    let columns = DEFAULT_TARGET_DENYLIST
        .iter()
        .map(|s| s.to_string())
        .chain(["elo_diff".to_string()])
        .collect::<Vec<_>>();
    let report = guard_columns(&columns, &Denylist::default());
    assert_eq!(report.features, cols(&["elo_diff"]));
    assert_eq!(report.leaked.len(), DEFAULT_TARGET_DENYLIST.len());
}

#[test]
fn target_names_and_extras_extend_the_defaults() {
    let mut denylist = Denylist::new(["closing_odds_result"]);
    denylist.extend(["corners_over_9_5"]);
    let report = guard_columns(
        &cols(&["corners_over_9_5", "closing_odds_result", "home_form", "date"]),
        &denylist,
    );
    assert_eq!(report.leaked, cols(&["corners_over_9_5", "closing_odds_result"]));
    assert_eq!(report.identifiers, cols(&["date"]));
    assert_eq!(report.features, cols(&["home_form"]));
    assert!(report.has_leakage());
}

#[test]
fn feature_order_is_preserved() {
    let report = guard_columns(
        &cols(&["month", "ftr", "elo_home", "league", "elo_away"]),
        &Denylist::default(),
    );
    assert_eq!(report.features, cols(&["month", "elo_home", "elo_away"]));
    assert_eq!(report.identifiers, cols(&["league"]));
}

#[test]
fn renamed_outcome_columns_are_not_caught() {
    let report = guard_columns(&cols(&["goals_total_ft"]), &Denylist::default());
    assert!(!report.has_leakage());
}
