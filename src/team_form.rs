use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::store::{MatchRecord, MatchStore};

pub const DEFAULT_FORM_WINDOW: usize = 10;

/// Neutral midpoint on the 0-10 form scale, returned when a team has no
/// qualifying history.
pub const NEUTRAL_FORM_RATING: f64 = 5.0;

const RECENT_FORM_LEN: usize = 5;
const TREND_MIN_MATCHES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormTrend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

/// Rolling summary of a team's recent finished matches. Treated as a cache:
/// stale values are acceptable, `last_updated` says how stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSnapshot {
    pub team_id: u32,
    pub window_size: usize,
    pub matches_analyzed: usize,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub goals_for: i64,
    pub goals_against: i64,
    pub goal_difference: i64,
    /// Percentage, 0-100.
    pub win_rate: f64,
    /// 0-10, (3*wins + draws) / matches / 3 * 10.
    pub form_rating: f64,
    /// Most-recent-first W/D/L string, right-padded with 'N' to 5 chars.
    pub recent_form: String,
    pub trend: FormTrend,
    pub last_updated: DateTime<Utc>,
}

impl FormSnapshot {
    pub fn neutral(team_id: u32, window_size: usize) -> Self {
        Self {
            team_id,
            window_size,
            matches_analyzed: 0,
            wins: 0,
            draws: 0,
            losses: 0,
            goals_for: 0,
            goals_against: 0,
            goal_difference: 0,
            win_rate: 0.0,
            form_rating: NEUTRAL_FORM_RATING,
            recent_form: "N".repeat(RECENT_FORM_LEN),
            trend: FormTrend::InsufficientData,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchResult {
    Win,
    Draw,
    Loss,
}

impl MatchResult {
    fn points(self) -> u32 {
        match self {
            MatchResult::Win => 3,
            MatchResult::Draw => 1,
            MatchResult::Loss => 0,
        }
    }

    fn letter(self) -> char {
        match self {
            MatchResult::Win => 'W',
            MatchResult::Draw => 'D',
            MatchResult::Loss => 'L',
        }
    }
}

/// Result of `m` from the perspective of `team_id`, along with goals
/// for/against. None when the match lacks a usable scoreline.
fn result_for(m: &MatchRecord, team_id: u32) -> Option<(MatchResult, i64, i64)> {
    let (Some(home_goals), Some(away_goals)) = (m.home_goals, m.away_goals) else {
        return None;
    };
    let is_home = m.home_team_id == team_id;
    let (for_goals, against_goals) = if is_home {
        (home_goals as i64, away_goals as i64)
    } else {
        (away_goals as i64, home_goals as i64)
    };
    let result = if for_goals > against_goals {
        MatchResult::Win
    } else if for_goals < against_goals {
        MatchResult::Loss
    } else {
        MatchResult::Draw
    };
    Some((result, for_goals, against_goals))
}

/// Computes a team's rolling form from its `window_size` most recent
/// finished matches before `as_of` (defaults to now). Never fails on an
/// empty history; a neutral snapshot comes back instead.
pub fn compute_form(
    store: &dyn MatchStore,
    team_id: u32,
    window_size: usize,
    as_of: Option<DateTime<Utc>>,
) -> Result<FormSnapshot, CoreError> {
    if store.get_team(team_id)?.is_none() {
        return Err(CoreError::TeamNotFound(team_id));
    }

    let window_size = window_size.max(1);
    let cutoff = as_of.unwrap_or_else(Utc::now);
    let matches = store.get_recent_finished_matches(team_id, cutoff, window_size)?;

    // Most recent first, with unusable scorelines dropped up front.
    let results: Vec<(MatchResult, i64, i64)> = matches
        .iter()
        .filter_map(|m| result_for(m, team_id))
        .collect();

    if results.is_empty() {
        return Ok(FormSnapshot::neutral(team_id, window_size));
    }

    let mut wins = 0u32;
    let mut draws = 0u32;
    let mut losses = 0u32;
    let mut goals_for = 0i64;
    let mut goals_against = 0i64;
    for (result, for_goals, against_goals) in &results {
        match result {
            MatchResult::Win => wins += 1,
            MatchResult::Draw => draws += 1,
            MatchResult::Loss => losses += 1,
        }
        goals_for += for_goals;
        goals_against += against_goals;
    }

    let total = results.len() as f64;
    let form_rating = ((3 * wins + draws) as f64 / total / 3.0 * 10.0).clamp(0.0, 10.0);

    Ok(FormSnapshot {
        team_id,
        window_size,
        matches_analyzed: results.len(),
        wins,
        draws,
        losses,
        goals_for,
        goals_against,
        goal_difference: goals_for - goals_against,
        win_rate: wins as f64 / total * 100.0,
        form_rating,
        recent_form: recent_form_string(&results),
        trend: compute_trend(&results),
        last_updated: Utc::now(),
    })
}

/// Length-5 result string, most recent first, padded with 'N' on the right.
/// Display/encoding only; it does not feed the form rating.
fn recent_form_string(results: &[(MatchResult, i64, i64)]) -> String {
    let mut out: String = results
        .iter()
        .take(RECENT_FORM_LEN)
        .map(|(result, _, _)| result.letter())
        .collect();
    while out.len() < RECENT_FORM_LEN {
        out.push('N');
    }
    out
}

/// Compares points taken in the most recent half of the window (indices 0-2
/// of the most-recent-first list) against the older half (indices 3-5).
fn compute_trend(results: &[(MatchResult, i64, i64)]) -> FormTrend {
    if results.len() < TREND_MIN_MATCHES {
        return FormTrend::InsufficientData;
    }

    let late_points: u32 = results
        .iter()
        .take(3)
        .map(|(result, _, _)| result.points())
        .sum();
    let early_points: u32 = results
        .iter()
        .skip(3)
        .take(3)
        .map(|(result, _, _)| result.points())
        .sum();

    if late_points > early_points + 2 {
        FormTrend::Improving
    } else if early_points > late_points + 2 {
        FormTrend::Declining
    } else {
        FormTrend::Stable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormComparison {
    pub home: FormSnapshot,
    pub away: FormSnapshot,
    /// Home form rating minus away form rating.
    pub form_edge: f64,
    pub home_win_probability: f64,
    pub draw_probability: f64,
    pub away_win_probability: f64,
}

/// Cheap form-only baseline comparison of two teams; not a trained model.
pub fn compare_teams(
    store: &dyn MatchStore,
    home_team_id: u32,
    away_team_id: u32,
    window_size: usize,
    as_of: Option<DateTime<Utc>>,
) -> Result<FormComparison, CoreError> {
    let home = compute_form(store, home_team_id, window_size, as_of)?;
    let away = compute_form(store, away_team_id, window_size, as_of)?;

    let home_strength = home.form_rating + 0.5;
    let away_strength = away.form_rating;
    let total = home_strength + away_strength + 5.0;

    Ok(FormComparison {
        form_edge: home.form_rating - away.form_rating,
        home_win_probability: home_strength / total,
        draw_probability: 5.0 / total,
        away_win_probability: away_strength / total,
        home,
        away,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MatchStatus, MemoryStore, TeamRef};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, day, 18, 0, 0).unwrap()
    }

    fn team(id: u32) -> TeamRef {
        TeamRef {
            id,
            name: format!("Team {id}"),
            strength_rating: None,
            home_advantage: None,
        }
    }

    /// Adds a finished match for team 1 at home with the given scoreline.
    fn add_home_match(store: &MemoryStore, id: u64, day: u32, hg: i32, ag: i32) {
        store.add_match(MatchRecord {
            id,
            league_id: 1,
            home_team_id: 1,
            away_team_id: 2,
            date: ts(day),
            status: MatchStatus::Finished,
            home_goals: Some(hg),
            away_goals: Some(ag),
            odds: None,
        });
    }

    #[test]
    fn no_history_yields_neutral_snapshot() {
        let store = MemoryStore::new();
        store.add_team(team(1));

        let snap = compute_form(&store, 1, DEFAULT_FORM_WINDOW, None).expect("compute form");
        assert_eq!(snap.form_rating, 5.0);
        assert_eq!(snap.trend, FormTrend::InsufficientData);
        assert_eq!(snap.recent_form, "NNNNN");
        assert_eq!(snap.wins + snap.draws + snap.losses, 0);
    }

    #[test]
    fn unknown_team_is_an_error() {
        let store = MemoryStore::new();
        let err = compute_form(&store, 77, 5, None).unwrap_err();
        assert!(matches!(err, CoreError::TeamNotFound(77)));
    }

    #[test]
    fn five_match_scenario_matches_expected_rating() {
        let store = MemoryStore::new();
        store.add_team(team(1));
        store.add_team(team(2));
        // Oldest to newest: W, W, D, L, W.
        add_home_match(&store, 1, 1, 2, 0);
        add_home_match(&store, 2, 2, 1, 0);
        add_home_match(&store, 3, 3, 1, 1);
        add_home_match(&store, 4, 4, 0, 3);
        add_home_match(&store, 5, 5, 2, 1);

        let snap = compute_form(&store, 1, 5, Some(ts(10))).expect("compute form");
        assert_eq!((snap.wins, snap.draws, snap.losses), (3, 1, 1));
        assert!((snap.form_rating - (3.0 * 3.0 + 1.0) / 5.0 / 3.0 * 10.0).abs() < 1e-9);
        assert!((snap.form_rating - 6.666_666_666).abs() < 1e-6);
        assert_eq!(snap.recent_form, "WLDWW");
        assert_eq!(snap.win_rate, 60.0);
    }

    #[test]
    fn away_role_is_resolved_per_match() {
        let store = MemoryStore::new();
        store.add_team(team(1));
        store.add_team(team(2));
        // Team 1 away, wins 0-2.
        store.add_match(MatchRecord {
            id: 9,
            league_id: 1,
            home_team_id: 2,
            away_team_id: 1,
            date: ts(3),
            status: MatchStatus::Finished,
            home_goals: Some(0),
            away_goals: Some(2),
            odds: None,
        });

        let snap = compute_form(&store, 1, 5, Some(ts(10))).expect("compute form");
        assert_eq!(snap.wins, 1);
        assert_eq!(snap.goals_for, 2);
        assert_eq!(snap.goals_against, 0);
    }

    #[test]
    fn trend_improves_when_recent_half_outpaces_older_half() {
        let store = MemoryStore::new();
        store.add_team(team(1));
        store.add_team(team(2));
        // Oldest three: L, L, L. Newest three: W, W, W.
        for (day, (hg, ag)) in [(1, (0, 1)), (2, (0, 2)), (3, (1, 2)), (4, (2, 0)), (5, (1, 0)), (6, (3, 1))] {
            add_home_match(&store, day as u64, day, hg, ag);
        }

        let snap = compute_form(&store, 1, 6, Some(ts(10))).expect("compute form");
        assert_eq!(snap.trend, FormTrend::Improving);

        // Three matches only: not enough signal.
        let short = compute_form(&store, 1, 3, Some(ts(4))).expect("compute form");
        assert_eq!(short.trend, FormTrend::InsufficientData);
    }

    #[test]
    fn cutoff_excludes_matches_on_or_after_as_of() {
        let store = MemoryStore::new();
        store.add_team(team(1));
        store.add_team(team(2));
        add_home_match(&store, 1, 5, 2, 0);

        let snap = compute_form(&store, 1, 5, Some(ts(5))).expect("compute form");
        assert_eq!(snap.matches_analyzed, 0);
        assert_eq!(snap.form_rating, 5.0);
    }

    #[test]
    fn comparison_probabilities_form_a_simplex() {
        let store = MemoryStore::new();
        store.add_team(team(1));
        store.add_team(team(2));
        add_home_match(&store, 1, 1, 2, 0);
        add_home_match(&store, 2, 2, 2, 2);

        let cmp = compare_teams(&store, 1, 2, 5, Some(ts(10))).expect("compare");
        let sum = cmp.home_win_probability + cmp.draw_probability + cmp.away_win_probability;
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(cmp.home_win_probability > cmp.away_win_probability);
    }
}
