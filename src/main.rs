use std::fs;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use sokodlex::analysis::storage_heuristic;
use sokodlex::board::{SokoState, load_xsb_levels};
use sokodlex::config::SolverConfig;
use sokodlex::options::Options;
use sokodlex::report::SearchReport;
use sokodlex::search::{AutoSelect, MoveStack, write_solution};

fn main() -> ExitCode {
    let env = env_logger::Env::new()
        .filter_or("SOKODLEX_LOG", "info")
        .write_style("SOKODLEX_LOG_STYLE");
    env_logger::init_from_env(env);

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<bool> {
    let options = Options::from_env();
    let config = match &options.config {
        Some(path) => SolverConfig::load_from_file(path)?,
        None => SolverConfig::default(),
    };

    let levels = load_xsb_levels(&options.levelset)
        .with_context(|| format!("loading level set {:?}", options.levelset))?;
    if levels.is_empty() {
        bail!("no levels in {:?}", options.levelset);
    }
    log::info!("{} levels loaded", levels.len());
    let level_index = options.level.clamp(1, levels.len());
    let level = &levels[level_index - 1];
    log::info!("level {}", level_index);

    let state = if options.backward {
        SokoState::dual_from_level(level)
    } else {
        SokoState::from_level(level)
    };

    let levelset_base = options
        .levelset
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "levels".to_string());
    let var_dir = options
        .var_dir
        .clone()
        .unwrap_or_else(|| config.var_dir.clone())
        .join(format!("{}_l{}", levelset_base, level_index));
    fs::create_dir_all(&var_dir).with_context(|| format!("creating {:?}", var_dir))?;

    let seed = options.seed.unwrap_or(config.seed);
    let stack = MoveStack::new(
        state,
        Some(var_dir.join("deadlocks")),
        !options.backward,
    )
    .with_seed(seed);
    let mut auto = AutoSelect::new(stack, storage_heuristic, seed);

    let step_limit = options.steps.unwrap_or(config.step_limit);
    let started = Instant::now();
    let mut report = SearchReport::new(levelset_base, level_index);

    for _ in 0..step_limit {
        if auto.stack.base_state().is_solved() {
            report.solved = true;
            break;
        }
        match auto.step() {
            Ok(true) => {}
            Ok(false) => {
                if auto.stack.is_locked_full() && auto.stack.is_on_start() {
                    report.unsolvable = true;
                }
                break;
            }
            Err(err) => {
                report.error = Some(err.to_string());
                break;
            }
        }
    }

    if report.solved {
        if let Some((pushes, moves)) = write_solution(&var_dir, &auto.stack)? {
            report.pushes = Some(pushes);
            report.moves = Some(moves);
            log::info!("solved with {} pushes / {} moves", pushes, moves);
        }
    }

    report.steps = auto.steps();
    report.full_deadlocks = auto.stack.deadlocks.full_count();
    report.analysis_time = started.elapsed();
    println!("{}", report);
    if let Some(path) = &options.report {
        report
            .save_to_file(path)
            .with_context(|| format!("writing report to {}", path))?;
    }
    if let Some(err) = &report.error {
        bail!("search aborted: {}", err);
    }
    Ok(report.solved)
}
