use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use grn_fit_core::constants::MAX_SIMULATION_STEPS;
use grn_fit_core::genes::GeneGroups;
use grn_fit_core::network::GrnTopology;
use grn_fit_core::rng::create_rng;
use grn_fit_core::{
    CellState, GrnSimulator, ParameterCodec, ParamsBlob, RunConfig, RunEvent, RunHandle,
    RunSummary, SimulationOptions, SimulationParams,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "grn-fit")]
#[command(about = "Fit a gene regulatory network simulation to a target expression profile")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an optimization from a config file
    Optimize {
        /// Path to run config (JSON); missing fields take their defaults
        #[arg(long)]
        config: PathBuf,

        /// Output directory for summary.json and params.json (optional)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Stop the run after this many seconds of wall-clock time
        #[arg(long)]
        max_seconds: Option<f64>,
    },
    /// Simulate one cell from a parameter blob and print its final state
    Simulate {
        /// Parameter blob: a JSON file path or a compact string
        #[arg(long)]
        params: String,

        /// Spatial angle in radians
        #[arg(long, default_value_t = 0.0)]
        angle: f64,

        #[arg(long, default_value_t = 48.0)]
        max_time: f64,

        #[arg(long, default_value_t = 0.01)]
        noise: f64,

        /// Apply every morphogen at full strength regardless of angle
        #[arg(long)]
        uniform_morphogens: bool,

        /// Print snapshots at these times instead of the endpoint
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        times: Vec<f64>,

        /// Only print these genes (by name), e.g. TF_LIN1,TF_LIN2
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        genes: Vec<String>,

        #[arg(long, default_value_t = 0)]
        network_seed: u64,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Check whether a parameter set settles between two time points
    Stability {
        /// Parameter blob: a JSON file path or a compact string
        #[arg(long)]
        params: String,

        #[arg(long, default_value_t = 48.0)]
        t1: f64,

        #[arg(long, default_value_t = 96.0)]
        t2: f64,

        /// Maximum per-gene drift between t1 and t2
        #[arg(long, default_value_t = 0.01)]
        threshold: f64,

        #[arg(long, default_value_t = 0.0)]
        angle: f64,

        #[arg(long, default_value_t = 0)]
        network_seed: u64,
    },
    /// Export the network topology as JSON
    ExportNetwork {
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Dump the default run configuration to stdout
    DumpDefaultConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_simulator(network_seed: u64, seed: u64) -> GrnSimulator {
    let topology = GrnTopology::build(GeneGroups::standard(), &mut create_rng(network_seed));
    GrnSimulator::new(Arc::new(topology), create_rng(seed))
}

/// Read a blob from a JSON file, or decode it as a compact string.
fn load_params(source: &str, gene_count: usize) -> Result<SimulationParams> {
    let path = Path::new(source);
    let blob = if path.is_file() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read params file {}", path.display()))?;
        ParamsBlob::from_json(&text).context("failed to parse params file")?
    } else {
        ParamsBlob::from_compact(source).context("failed to decode compact params")?
    };
    blob.into_params(gene_count)
        .context("params are out of range")
}

/// Gene name -> expression for the selected genes, or the full state when none are given.
fn render_state(state: &CellState, groups: &GeneGroups, genes: &[String]) -> Result<String> {
    if genes.is_empty() {
        return Ok(serde_json::to_string_pretty(state)?);
    }
    let mut selected = serde_json::Map::new();
    for name in genes {
        let Some(idx) = groups.index_of(name) else {
            bail!("unknown gene {name:?}");
        };
        selected.insert(name.clone(), serde_json::json!(state.expression[idx]));
    }
    let value = serde_json::json!({
        "time": state.time,
        "lineage": state.lineage,
        "expression": selected,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

fn check_step_limit(horizon: f64) -> Result<()> {
    let steps = horizon / SimulationOptions::default().dt;
    if steps > MAX_SIMULATION_STEPS as f64 {
        bail!("horizon {horizon} needs {steps:.0} steps, limit is {MAX_SIMULATION_STEPS}");
    }
    Ok(())
}

fn print_interventions(params: &SimulationParams, groups: &GeneGroups) {
    if params.intervention_count() == 0 {
        return;
    }
    let name = |g: usize| groups.name(g).unwrap_or("?").to_string();
    println!(
        "Interventions: {} (magnitude {:.3})",
        params.intervention_count(),
        params.intervention_magnitude()
    );
    for &g in &params.knockouts {
        println!("  knockout {}", name(g));
    }
    for (g, m) in params.modifiers_by_effect() {
        println!("  modifier {} x{m:.3}", name(g));
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn run_optimize(config_path: &Path, out: Option<PathBuf>, max_seconds: Option<f64>) -> Result<()> {
    let file = File::open(config_path).context("failed to open config file")?;
    let config: RunConfig =
        serde_json::from_reader(BufReader::new(file)).context("failed to parse config")?;
    config.validate().context("Config validation error")?;
    println!("Loaded config from {:?}", config_path);
    let labels = ParameterCodec::new(config.encoding.clone()).slot_labels();
    info!(dimensions = labels.len(), slots = %labels.join(","), "search space");

    let deadline = max_seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| Instant::now() + Duration::from_secs_f64(s));

    let handle = RunHandle::spawn(config.clone()).context("failed to start run")?;
    let mut summary = RunSummary::default();
    let mut stop_sent = false;
    loop {
        if let Some(deadline) = deadline {
            if !stop_sent && Instant::now() >= deadline {
                info!("wall-clock budget spent, requesting stop");
                handle.stop();
                stop_sent = true;
            }
        }
        let event = match handle.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        summary.record(&event);
        match &event {
            RunEvent::Progress(p) => println!(
                "gen {:>4} [{:?}] best={:.5} mean={:.5} sigma={:.4} r={:.3}",
                p.generation, p.phase, p.best_fitness, p.mean_fitness, p.sigma, p.correlation
            ),
            RunEvent::Done(d) => println!(
                "Run complete after {} generations: fitness={:.6} converged={} stopped={}",
                d.generations, d.fitness, d.converged, d.stopped
            ),
            RunEvent::Error { message } => warn!(%message, "run failed"),
        }
        if event.is_terminal() {
            break;
        }
    }
    handle.join().context("run thread failed")?;

    if let Some(message) = &summary.error {
        bail!("optimization failed: {message}");
    }
    let Some(done) = summary.done.clone() else {
        bail!("run ended without a result");
    };

    let groups = GeneGroups::standard();
    let params = done
        .params
        .clone()
        .into_params(groups.gene_count())
        .context("best params are out of range")?;
    print_interventions(&params, &groups);
    let mut simulator = build_simulator(config.network_seed, 0);
    let options = SimulationOptions {
        noise_level: 0.0,
        ..config.simulation_options()
    };
    let report = simulator.stability_check(
        &params,
        &options,
        config.max_time,
        config.max_time * 2.0,
        config.stability_threshold,
    );
    println!(
        "Stability: max drift {:.5} ({})",
        report.max_drift,
        if report.stable { "stable" } else { "unstable" }
    );
    summary.stability = Some(report);

    if let Some(out_dir) = out {
        std::fs::create_dir_all(&out_dir).context("failed to create output directory")?;
        write_json(&out_dir.join("summary.json"), &summary)?;
        write_json(&out_dir.join("params.json"), &done.params)?;
        println!("Results saved to {:?}", out_dir);
    } else {
        println!("Best params (compact): {}", done.params.to_compact()?);
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::DumpDefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&RunConfig::default())?);
        }
        Commands::ExportNetwork { seed, out } => {
            let topology = GrnTopology::build(GeneGroups::standard(), &mut create_rng(seed));
            let export = topology.export();
            match out {
                Some(path) => write_json(&path, &export)?,
                None => println!("{}", serde_json::to_string_pretty(&export)?),
            }
        }
        Commands::Optimize {
            config,
            out,
            max_seconds,
        } => run_optimize(&config, out, max_seconds)?,
        Commands::Simulate {
            params,
            angle,
            max_time,
            noise,
            uniform_morphogens,
            times,
            genes,
            network_seed,
            seed,
        } => {
            if !(max_time.is_finite() && max_time > 0.0) {
                bail!("--max-time must be positive");
            }
            check_step_limit(max_time)?;
            let mut simulator = build_simulator(network_seed, seed);
            let params = load_params(&params, simulator.topology().gene_count())?;
            let options = SimulationOptions {
                spatial_angle: angle,
                max_time,
                uniform_morphogens,
                noise_level: noise.max(0.0),
                ..SimulationOptions::default()
            };
            let groups = simulator.topology().groups().clone();
            let states = if times.is_empty() {
                vec![simulator.run(&params, &options)]
            } else {
                simulator.run_time_course(&params, &options, &times)
            };
            for state in &states {
                println!("{}", render_state(state, &groups, &genes)?);
            }
        }
        Commands::Stability {
            params,
            t1,
            t2,
            threshold,
            angle,
            network_seed,
        } => {
            if !(t1 >= 0.0 && t2 > t1) {
                bail!("--t2 must be greater than --t1 and both non-negative");
            }
            check_step_limit(t2)?;
            let mut simulator = build_simulator(network_seed, 0);
            let params = load_params(&params, simulator.topology().gene_count())?;
            let options = SimulationOptions {
                spatial_angle: angle,
                noise_level: 0.0,
                ..SimulationOptions::default()
            };
            let report = simulator.stability_check(&params, &options, t1, t2, threshold);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
