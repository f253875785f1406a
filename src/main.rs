use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use fittrack::database::{self, Store};
use fittrack::prefs::PreferenceStore;
use fittrack::sensor::{NoMotionSensors, SensorSource};
use fittrack::stats::StatsPipeline;
use fittrack::{env, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env::load_environment()?;
    telemetry::init_tracing();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:fittrack.db".to_string());
    let pool = database::connect(&database_url).await?;
    let store = Store::new(pool);

    let prefs_path = std::env::var("FITTRACK_PREFS_PATH")
        .unwrap_or_else(|_| "fittrack-prefs.json".to_string());
    let prefs = PreferenceStore::load(PathBuf::from(prefs_path)).await?;

    // Headless hosts have no motion sensors; the source degrades to a
    // single zero observation.
    let sensor = SensorSource::new(Arc::new(NoMotionSensors));

    let pipeline = StatsPipeline::new(store.clone(), prefs.clone(), sensor);
    let mut summaries = pipeline.subscribe();

    info!("fittrack core started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            summary = summaries.next() => {
                match summary {
                    Some(summary) => info!(
                        steps = summary.steps,
                        step_goal = summary.step_goal,
                        calories_burned = summary.calories_burned,
                        food_calories = summary.food_calories,
                        cardio_minutes = summary.cardio_minutes,
                        strength_sets = summary.strength_sets,
                        "Activity summary updated"
                    ),
                    None => break,
                }
            }
        }
    }

    Ok(())
}
