use tracing_subscriber::EnvFilter;
use wp_optimizer::{
    AcquisitionFactory, EventKind, Extremum, Listener, Objective, Optimiser, OptimiserConfig,
    OptimiserEvent, SearchSpace,
};

/// Branin function; global minimum 0.397887 at three points.
fn branin(x1: f64, x2: f64) -> f64 {
    use std::f64::consts::PI;
    let b = 5.1 / (4.0 * PI * PI);
    let c = 5.0 / PI;
    let t = 1.0 / (8.0 * PI);
    (x2 - b * x1 * x1 + c * x1 - 6.0).powi(2) + 10.0 * (1.0 - t) * x1.cos() + 10.0
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("WAYPOINT_CONFIG") {
        Ok(path) => OptimiserConfig::from_json_str(&std::fs::read_to_string(&path)?)?,
        Err(_) => OptimiserConfig::new("branin-demo")
            .with_extremum(Extremum::Min)
            .with_pre_phase_trials(5),
    };
    let max_trials = std::env::var("WAYPOINT_MAX_TRIALS")
        .ok()
        .map(|v| v.parse::<usize>())
        .transpose()?
        .unwrap_or(25);

    let space = SearchSpace::new()
        .add_float("x1", -5.0, 10.0)
        .add_float("x2", 0.0, 15.0);
    let objective = Objective::new(|config| {
        let x1 = config["x1"].as_f64().unwrap_or_default();
        let x2 = config["x2"].as_f64().unwrap_or_default();
        Ok(branin(x1, x2).into())
    });
    let progress = Listener::new("progress").on(EventKind::EvaluationFinished, |event, record| {
        if let OptimiserEvent::EvaluationFinished { trial_num, y, .. } = event {
            println!(
                "trial {:>3}  y = {:>10}  finished {}",
                trial_num,
                y.map_or_else(|| "failed".to_string(), |y| format!("{y:.5}")),
                record.finished_count()
            );
        }
    });

    let mut optimiser = Optimiser::builder(space, objective)
        .config(config)
        .acquisition(AcquisitionFactory::ei(0.01))
        .listener(progress)
        .build()?;
    let summary = optimiser.run(max_trials)?;

    println!(
        "{} trials in {:.2}s, {} failed",
        summary.trials, summary.elapsed_seconds, summary.failed
    );
    if let (Some(best), Some(config)) = (summary.incumbent, optimiser.incumbent_config()?) {
        println!("best y = {:?} (trial {}) at {:?}", best.y, best.num, config);
    }
    if std::env::var_os("WAYPOINT_PRINT_CHECKPOINT").is_some() {
        println!("{}", optimiser.checkpoint()?.to_json()?);
    }
    Ok(())
}
