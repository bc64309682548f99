use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::store::{MatchOdds, MatchRecord, MatchStore, TeamRef};
use crate::team_form::{self, FormSnapshot, NEUTRAL_FORM_RATING};

/// Canonical feature ordering. Models are trained against this exact order;
/// changing it invalidates every previously trained model, so additions go
/// at the end and removals do not happen.
pub const FEATURE_NAMES: [&str; 30] = [
    // Team form block
    "home_form_rating",
    "away_form_rating",
    "home_recent_form",
    "away_recent_form",
    "home_win_rate",
    "away_win_rate",
    // Strength block
    "home_strength_rating",
    "away_strength_rating",
    "home_advantage_rating",
    // Goal block
    "home_goals_per_match",
    "away_goals_per_match",
    "home_goals_against_per_match",
    "away_goals_against_per_match",
    "home_goal_difference",
    "away_goal_difference",
    // Head-to-head block (from the current home team's perspective)
    "h2h_home_win_rate",
    "h2h_draw_rate",
    "h2h_away_win_rate",
    "h2h_home_goals_avg",
    "h2h_away_goals_avg",
    // Injury block
    "home_injury_count",
    "away_injury_count",
    "home_injury_impact",
    "away_injury_impact",
    // Market block
    "home_odds",
    "draw_odds",
    "away_odds",
    "implied_probability_home",
    "implied_probability_draw",
    "implied_probability_away",
];

pub const DEFAULT_STRENGTH_RATING: f64 = 70.0;
pub const DEFAULT_HOME_ADVANTAGE: f64 = 1.0;

/// Bookmaker defaults used when a match carries no market odds.
pub const DEFAULT_ODDS: MatchOdds = MatchOdds {
    home: 1.5,
    draw: 3.5,
    away: 4.0,
};

const H2H_LIMIT: usize = 20;
const INJURY_CAP: usize = 5;
const DEFAULT_INJURY_IMPACT: f64 = 5.0;

/// One match's features in the canonical `FEATURE_NAMES` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub match_id: u64,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn names() -> Vec<String> {
        FEATURE_NAMES.iter().map(|name| name.to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .and_then(|idx| self.values.get(idx).copied())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureEngineer {
    /// Recent matches considered per team for the form block.
    pub lookback_matches: usize,
    /// Meetings considered for the head-to-head block.
    pub h2h_limit: usize,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self {
            lookback_matches: team_form::DEFAULT_FORM_WINDOW,
            h2h_limit: H2H_LIMIT,
        }
    }
}

struct H2hBlock {
    home_win_rate: f64,
    draw_rate: f64,
    away_win_rate: f64,
    home_goals_avg: f64,
    away_goals_avg: f64,
}

impl H2hBlock {
    /// No shared history: an even win-rate split and no goals signal.
    fn neutral() -> Self {
        Self {
            home_win_rate: 0.5,
            draw_rate: 0.0,
            away_win_rate: 0.5,
            home_goals_avg: 0.0,
            away_goals_avg: 0.0,
        }
    }
}

struct InjuryBlock {
    count: f64,
    impact: f64,
}

impl FeatureEngineer {
    /// Builds the feature vector for `match_id`. Deterministic for a fixed
    /// store snapshot. Missing auxiliary data (odds, injuries, history)
    /// degrades to neutral defaults; a missing match or team is an error.
    pub fn extract_features(
        &self,
        store: &dyn MatchStore,
        match_id: u64,
    ) -> Result<FeatureVector, CoreError> {
        let m = store
            .get_match(match_id)?
            .ok_or(CoreError::MatchNotFound(match_id))?;
        self.extract_for_match(store, &m)
    }

    /// Same as `extract_features` but for an already loaded record, so
    /// dataset assembly does not re-query each match by id.
    pub fn extract_for_match(
        &self,
        store: &dyn MatchStore,
        m: &MatchRecord,
    ) -> Result<FeatureVector, CoreError> {
        let home_team = store
            .get_team(m.home_team_id)?
            .ok_or(CoreError::TeamNotFound(m.home_team_id))?;
        let away_team = store
            .get_team(m.away_team_id)?
            .ok_or(CoreError::TeamNotFound(m.away_team_id))?;

        // Form is computed as of the match date so finished training matches
        // never see their own result.
        let home_form =
            team_form::compute_form(store, m.home_team_id, self.lookback_matches, Some(m.date))?;
        let away_form =
            team_form::compute_form(store, m.away_team_id, self.lookback_matches, Some(m.date))?;

        let h2h = self.h2h_block(store, m)?;
        let home_injuries = injury_block(store, m.home_team_id, m.date)?;
        let away_injuries = injury_block(store, m.away_team_id, m.date)?;

        let odds = m.odds.unwrap_or(DEFAULT_ODDS);
        let (p_home, p_draw, p_away) = implied_probabilities(&odds);

        let mut values = Vec::with_capacity(FEATURE_NAMES.len());
        // Team form block
        values.push(home_form.form_rating);
        values.push(away_form.form_rating);
        values.push(encode_form_string(&home_form.recent_form));
        values.push(encode_form_string(&away_form.recent_form));
        values.push(home_form.win_rate);
        values.push(away_form.win_rate);
        // Strength block
        values.push(strength_of(&home_team));
        values.push(strength_of(&away_team));
        values.push(home_team.home_advantage.unwrap_or(DEFAULT_HOME_ADVANTAGE));
        // Goal block
        values.push(per_match(home_form.goals_for, &home_form));
        values.push(per_match(away_form.goals_for, &away_form));
        values.push(per_match(home_form.goals_against, &home_form));
        values.push(per_match(away_form.goals_against, &away_form));
        values.push(home_form.goal_difference as f64);
        values.push(away_form.goal_difference as f64);
        // Head-to-head block
        values.push(h2h.home_win_rate);
        values.push(h2h.draw_rate);
        values.push(h2h.away_win_rate);
        values.push(h2h.home_goals_avg);
        values.push(h2h.away_goals_avg);
        // Injury block
        values.push(home_injuries.count);
        values.push(away_injuries.count);
        values.push(home_injuries.impact);
        values.push(away_injuries.impact);
        // Market block
        values.push(odds.home);
        values.push(odds.draw);
        values.push(odds.away);
        values.push(p_home);
        values.push(p_draw);
        values.push(p_away);

        debug_assert_eq!(values.len(), FEATURE_NAMES.len());
        Ok(FeatureVector {
            match_id: m.id,
            values,
        })
    }

    fn h2h_block(&self, store: &dyn MatchStore, m: &MatchRecord) -> Result<H2hBlock, CoreError> {
        let meetings =
            store.get_head_to_head(m.home_team_id, m.away_team_id, m.date, self.h2h_limit)?;

        let mut home_wins = 0usize;
        let mut draws = 0usize;
        let mut away_wins = 0usize;
        let mut home_goals = 0i64;
        let mut away_goals = 0i64;
        let mut counted = 0usize;

        for meeting in &meetings {
            let (Some(hg), Some(ag)) = (meeting.home_goals, meeting.away_goals) else {
                continue;
            };
            // Re-orient each historical meeting to the perspective of the
            // team playing at home in the match being predicted.
            let home_played_home = meeting.home_team_id == m.home_team_id;
            let (for_goals, against_goals) = if home_played_home {
                (hg as i64, ag as i64)
            } else {
                (ag as i64, hg as i64)
            };
            home_goals += for_goals;
            away_goals += against_goals;
            if for_goals > against_goals {
                home_wins += 1;
            } else if for_goals < against_goals {
                away_wins += 1;
            } else {
                draws += 1;
            }
            counted += 1;
        }

        if counted == 0 {
            return Ok(H2hBlock::neutral());
        }
        let n = counted as f64;
        Ok(H2hBlock {
            home_win_rate: home_wins as f64 / n,
            draw_rate: draws as f64 / n,
            away_win_rate: away_wins as f64 / n,
            home_goals_avg: home_goals as f64 / n,
            away_goals_avg: away_goals as f64 / n,
        })
    }
}

fn strength_of(team: &TeamRef) -> f64 {
    team.strength_rating.unwrap_or(DEFAULT_STRENGTH_RATING)
}

fn per_match(total: i64, form: &FormSnapshot) -> f64 {
    if form.matches_analyzed == 0 {
        0.0
    } else {
        total as f64 / form.matches_analyzed as f64
    }
}

fn injury_block(
    store: &dyn MatchStore,
    team_id: u32,
    at: DateTime<Utc>,
) -> Result<InjuryBlock, CoreError> {
    let mut injuries = store.get_active_injuries(team_id, at)?;
    // Keep only the most impactful few so a long injury list cannot dominate
    // the vector.
    injuries.sort_by(|a, b| {
        b.impact_score
            .unwrap_or(5)
            .cmp(&a.impact_score.unwrap_or(5))
    });
    injuries.truncate(INJURY_CAP);

    let impact: f64 = injuries
        .iter()
        .map(|inj| inj.impact_score.map(f64::from).unwrap_or(DEFAULT_INJURY_IMPACT))
        .sum();
    Ok(InjuryBlock {
        count: injuries.len() as f64,
        impact,
    })
}

/// Overround-free implied probabilities: p_i = (1/o_i) / sum_j (1/o_j).
pub fn implied_probabilities(odds: &MatchOdds) -> (f64, f64, f64) {
    let inv_home = 1.0 / odds.home.max(1.01);
    let inv_draw = 1.0 / odds.draw.max(1.01);
    let inv_away = 1.0 / odds.away.max(1.01);
    let total = inv_home + inv_draw + inv_away;
    (inv_home / total, inv_draw / total, inv_away / total)
}

/// Encodes a most-recent-first W/D/L/N string onto the 0-10 scale with
/// recency weights; an all-N string sits at the neutral midpoint.
pub fn encode_form_string(form: &str) -> f64 {
    const WEIGHTS: [f64; 5] = [5.0, 3.0, 2.0, 1.0, 1.0];

    let mut score = 0.0;
    let mut weight_seen = 0.0;
    for (ch, weight) in form.chars().zip(WEIGHTS) {
        match ch {
            'W' => {
                score += 3.0 * weight;
                weight_seen += weight;
            }
            'D' => {
                score += weight;
                weight_seen += weight;
            }
            'L' => weight_seen += weight,
            _ => {}
        }
    }
    if weight_seen <= 0.0 {
        return NEUTRAL_FORM_RATING;
    }
    score / weight_seen / 3.0 * 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InjuryRecord, MatchStatus, MemoryStore, TeamRef};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, 20, 0, 0).unwrap()
    }

    fn seed_teams(store: &MemoryStore) {
        store.add_team(TeamRef {
            id: 1,
            name: "Home FC".to_string(),
            strength_rating: Some(82.0),
            home_advantage: Some(1.2),
        });
        store.add_team(TeamRef {
            id: 2,
            name: "Away FC".to_string(),
            strength_rating: None,
            home_advantage: None,
        });
    }

    fn upcoming(id: u64, day: u32, odds: Option<MatchOdds>) -> MatchRecord {
        MatchRecord {
            id,
            league_id: 1,
            home_team_id: 1,
            away_team_id: 2,
            date: ts(day),
            status: MatchStatus::Scheduled,
            home_goals: None,
            away_goals: None,
            odds,
        }
    }

    #[test]
    fn vector_has_canonical_length_and_defaults() {
        let store = MemoryStore::new();
        seed_teams(&store);
        store.add_match(upcoming(100, 20, None));

        let engineer = FeatureEngineer::default();
        let fv = engineer.extract_features(&store, 100).expect("extract");

        assert_eq!(fv.values.len(), FEATURE_NAMES.len());
        assert_eq!(fv.get("home_strength_rating"), Some(82.0));
        assert_eq!(fv.get("away_strength_rating"), Some(DEFAULT_STRENGTH_RATING));
        assert_eq!(fv.get("home_advantage_rating"), Some(1.2));
        assert_eq!(fv.get("home_odds"), Some(DEFAULT_ODDS.home));
        assert_eq!(fv.get("home_form_rating"), Some(NEUTRAL_FORM_RATING));
        assert_eq!(fv.get("h2h_home_win_rate"), Some(0.5));
        assert_eq!(fv.get("h2h_away_win_rate"), Some(0.5));
        assert_eq!(fv.get("home_injury_count"), Some(0.0));
    }

    #[test]
    fn missing_match_and_team_fail_fast() {
        let store = MemoryStore::new();
        seed_teams(&store);
        let engineer = FeatureEngineer::default();
        assert!(matches!(
            engineer.extract_features(&store, 999),
            Err(CoreError::MatchNotFound(999))
        ));

        let mut orphan = upcoming(5, 20, None);
        orphan.away_team_id = 42;
        store.add_match(orphan);
        assert!(matches!(
            engineer.extract_features(&store, 5),
            Err(CoreError::TeamNotFound(42))
        ));
    }

    #[test]
    fn implied_probabilities_remove_the_overround() {
        let (p_home, p_draw, p_away) = implied_probabilities(&MatchOdds {
            home: 1.90,
            draw: 3.40,
            away: 3.75,
        });
        assert!((p_home + p_draw + p_away - 1.0).abs() < 1e-12);
        assert!((p_home - 0.48).abs() < 0.01);
        assert!((p_draw - 0.27).abs() < 0.01);
        assert!((p_away - 0.25).abs() < 0.01);
    }

    #[test]
    fn extraction_is_deterministic() {
        let store = MemoryStore::new();
        seed_teams(&store);
        store.add_match(MatchRecord {
            id: 1,
            league_id: 1,
            home_team_id: 1,
            away_team_id: 2,
            date: ts(2),
            status: MatchStatus::Finished,
            home_goals: Some(2),
            away_goals: Some(1),
            odds: None,
        });
        store.add_match(upcoming(
            2,
            20,
            Some(MatchOdds {
                home: 2.1,
                draw: 3.3,
                away: 3.2,
            }),
        ));

        let engineer = FeatureEngineer::default();
        let first = engineer.extract_features(&store, 2).expect("extract");
        let second = engineer.extract_features(&store, 2).expect("extract");
        assert_eq!(first, second);
    }

    #[test]
    fn h2h_is_oriented_to_current_home_team() {
        let store = MemoryStore::new();
        seed_teams(&store);
        // Past meeting with roles swapped: team 2 hosted and lost 0-3, so
        // team 1 (home in the upcoming match) owns that win.
        store.add_match(MatchRecord {
            id: 1,
            league_id: 1,
            home_team_id: 2,
            away_team_id: 1,
            date: ts(1),
            status: MatchStatus::Finished,
            home_goals: Some(0),
            away_goals: Some(3),
            odds: None,
        });
        store.add_match(upcoming(2, 20, None));

        let fv = FeatureEngineer::default()
            .extract_features(&store, 2)
            .expect("extract");
        assert_eq!(fv.get("h2h_home_win_rate"), Some(1.0));
        assert_eq!(fv.get("h2h_away_win_rate"), Some(0.0));
        assert_eq!(fv.get("h2h_home_goals_avg"), Some(3.0));
        assert_eq!(fv.get("h2h_away_goals_avg"), Some(0.0));
    }

    #[test]
    fn injuries_are_capped_at_five_most_severe() {
        let store = MemoryStore::new();
        seed_teams(&store);
        for impact in [2, 3, 4, 5, 6, 7, 8] {
            store.add_injury(InjuryRecord {
                team_id: 1,
                start: ts(1),
                expected_return: ts(28),
                impact_score: Some(impact),
            });
        }
        store.add_match(upcoming(1, 20, None));

        let fv = FeatureEngineer::default()
            .extract_features(&store, 1)
            .expect("extract");
        assert_eq!(fv.get("home_injury_count"), Some(5.0));
        // Top five impacts: 8 + 7 + 6 + 5 + 4.
        assert_eq!(fv.get("home_injury_impact"), Some(30.0));
    }

    #[test]
    fn form_string_encoding_spans_the_scale() {
        assert!((encode_form_string("WWWWW") - 10.0).abs() < 1e-9);
        assert!(encode_form_string("LLLLL").abs() < 1e-9);
        assert_eq!(encode_form_string("NNNNN"), NEUTRAL_FORM_RATING);
        let mixed = encode_form_string("WDLNN");
        assert!(mixed > 0.0 && mixed < 10.0);
    }
}
