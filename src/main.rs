use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use matchcast::models::ModelKind;
use matchcast::pipeline::{Pipeline, PipelineConfig};
use matchcast::scheduler::SchedulerConfig;
use matchcast::store::{MatchOdds, MatchRecord, MatchStatus, MatchStore, MemoryStore, SqliteStore, TeamRef};
use matchcast::training::TrainingConfig;

const DEMO_TEAMS: [&str; 8] = [
    "Rovers", "Athletic", "Wanderers", "United", "City", "Albion", "County", "Harriers",
];

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("demo");

    let store = open_store()?;
    let pipeline = Pipeline::new(store, pipeline_config());

    match command {
        "demo" => run_demo(&pipeline),
        "train" => {
            let kind = args
                .get(1)
                .map(String::as_str)
                .map(parse_kind)
                .transpose()?
                .unwrap_or(ModelKind::Ensemble);
            let model = pipeline.train_model(kind, None)?;
            println!("Trained {} ({:?})", model.id, model.status());
            println!("Accuracy:  {:.3}", model.metrics.accuracy);
            println!("F1:        {:.3}", model.metrics.f1);
            println!("Log loss:  {:.3}", model.metrics.log_loss);
            for (name, weight) in model.top_features(5) {
                println!("  {name:<28} {weight:.4}");
            }
            Ok(())
        }
        "predict" => {
            let match_id: u64 = args
                .get(2)
                .context("usage: matchcast predict <model-id> <match-id>")?
                .parse()
                .context("match id must be numeric")?;
            let model_id = args
                .get(1)
                .context("usage: matchcast predict <model-id> <match-id>")?;
            let result = pipeline.predict(model_id, match_id)?;
            println!("Match {match_id}: {:?} ({:?})", result.outcome, result.source);
            println!("Home: {:.1}%", result.p_home * 100.0);
            println!("Draw: {:.1}%", result.p_draw * 100.0);
            println!("Away: {:.1}%", result.p_away * 100.0);
            println!("Confidence: {:.3}", result.confidence);
            Ok(())
        }
        "form" => {
            let team_id: u32 = args
                .get(1)
                .context("usage: matchcast form <team-id>")?
                .parse()
                .context("team id must be numeric")?;
            let form = pipeline.team_form(team_id)?;
            println!(
                "Team {team_id}: {} ({}W {}D {}L over {})",
                form.recent_form, form.wins, form.draws, form.losses, form.matches_analyzed
            );
            println!("Rating: {:.2}  Win rate: {:.1}%  Trend: {:?}", form.form_rating, form.win_rate, form.trend);
            Ok(())
        }
        other => bail!("unknown command '{other}' (expected demo, train, predict, or form)"),
    }
}

fn pipeline_config() -> PipelineConfig {
    let poll_secs = env::var("MATCHCAST_POLL_SECS")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(60)
        .max(1);
    let budget_secs = env::var("MATCHCAST_JOB_BUDGET_SECS")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(300)
        .max(1);
    let seed = env::var("MATCHCAST_SEED")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(42);
    let max_matches = env::var("MATCHCAST_TRAIN_CAP")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(matchcast::training::MAX_TRAINING_MATCHES)
        .clamp(10, 100_000);
    PipelineConfig {
        training: TrainingConfig {
            seed,
            max_matches,
            ..TrainingConfig::default()
        },
        scheduler: SchedulerConfig {
            poll_interval: Duration::from_secs(poll_secs),
            job_budget: Duration::from_secs(budget_secs),
        },
    }
}

/// SQLite when MATCHCAST_DB points at a file, otherwise an in-memory store
/// seeded with a synthetic league.
fn open_store() -> Result<Arc<dyn MatchStore>> {
    if let Ok(path) = env::var("MATCHCAST_DB") {
        let store = SqliteStore::open(&PathBuf::from(path))?;
        return Ok(Arc::new(store));
    }
    let store = MemoryStore::new();
    seed_synthetic_league(&store);
    Ok(Arc::new(store))
}

/// A season of plausible results: stronger sides win more often, scores
/// and odds follow the strength gap.
fn seed_synthetic_league(store: &MemoryStore) {
    let mut rng = StdRng::seed_from_u64(2026);
    let strengths: Vec<f64> = (0..DEMO_TEAMS.len())
        .map(|_| 55.0 + rng.r#gen::<f64>() * 35.0)
        .collect();
    for (idx, name) in DEMO_TEAMS.iter().enumerate() {
        store.add_team(TeamRef {
            id: idx as u32 + 1,
            name: name.to_string(),
            strength_rating: Some(strengths[idx]),
            home_advantage: Some(1.0 + rng.r#gen::<f64>() * 0.5),
        });
    }

    let start = Utc::now() - ChronoDuration::days(200);
    let mut match_id = 1u64;
    for round in 0..24u32 {
        for home in 0..DEMO_TEAMS.len() {
            let away = (home + 1 + round as usize % (DEMO_TEAMS.len() - 1)) % DEMO_TEAMS.len();
            if home == away {
                continue;
            }
            let edge = (strengths[home] + 4.0 - strengths[away]) / 40.0;
            let roll: f64 = rng.r#gen();
            let (hg, ag) = if roll < 0.25 {
                let g = rng.gen_range(0..3);
                (g, g)
            } else if roll < 0.55 + edge.clamp(-0.3, 0.3) {
                (rng.gen_range(1..4), rng.gen_range(0..2))
            } else {
                (rng.gen_range(0..2), rng.gen_range(1..4))
            };
            let home_odds = (2.4 - edge).clamp(1.2, 5.0);
            store.add_match(MatchRecord {
                id: match_id,
                league_id: 1,
                home_team_id: home as u32 + 1,
                away_team_id: away as u32 + 1,
                date: start + ChronoDuration::days(round as i64 * 7 + home as i64),
                status: MatchStatus::Finished,
                home_goals: Some(hg),
                away_goals: Some(ag),
                odds: Some(MatchOdds {
                    home: home_odds,
                    draw: 3.3,
                    away: (6.0 - home_odds).max(1.2),
                }),
            });
            match_id += 1;
        }
    }

    // A round of upcoming fixtures to predict.
    for home in 0..DEMO_TEAMS.len() / 2 {
        let away = DEMO_TEAMS.len() - 1 - home;
        store.add_match(MatchRecord {
            id: match_id,
            league_id: 1,
            home_team_id: home as u32 + 1,
            away_team_id: away as u32 + 1,
            date: Utc::now() + ChronoDuration::days(3),
            status: MatchStatus::Scheduled,
            home_goals: None,
            away_goals: None,
            odds: None,
        });
        match_id += 1;
    }
}

fn run_demo(pipeline: &Arc<Pipeline>) -> Result<()> {
    println!("Training ensemble on finished matches...");
    let model = pipeline.train_model(ModelKind::Ensemble, Some(1))?;
    println!(
        "{} ({:?}) accuracy {:.3}, log loss {:.3}\n",
        model.id,
        model.status(),
        model.metrics.accuracy,
        model.metrics.log_loss
    );

    println!("Top features:");
    for (name, weight) in model.top_features(8) {
        println!("  {name:<28} {weight:.4}");
    }

    let upcoming: Vec<u64> = {
        let mut ids = Vec::new();
        // The synthetic fixtures are the highest match ids.
        let matches = pipeline.store().list_finished_matches(Some(1), 1)?;
        let last_finished = matches.first().map(|m| m.id).unwrap_or(0);
        for id in last_finished + 1..last_finished + 1 + DEMO_TEAMS.len() as u64 / 2 {
            if pipeline.store().get_match(id)?.is_some() {
                ids.push(id);
            }
        }
        ids
    };

    println!("\nUpcoming fixtures:");
    for result in pipeline.predict_batch(&model.id, &upcoming)? {
        println!(
            "  match {:>3}  {:?}  H {:.1}%  D {:.1}%  A {:.1}%  ({:?})",
            result.match_id,
            result.outcome,
            result.p_home * 100.0,
            result.p_draw * 100.0,
            result.p_away * 100.0,
            result.source,
        );
    }
    Ok(())
}

fn parse_kind(raw: &str) -> Result<ModelKind> {
    match raw {
        "logistic" => Ok(ModelKind::Logistic),
        "forest" => Ok(ModelKind::Forest),
        "extra_trees" => Ok(ModelKind::ExtraTrees),
        "ensemble" => Ok(ModelKind::Ensemble),
        other => bail!("unknown model kind '{other}'"),
    }
}
