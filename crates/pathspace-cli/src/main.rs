//! Command-line runner for the pathspace exploration engine.

mod demos;

use clap::{Parser, Subcommand};
use miette::Diagnostic;
use pathspace_engine::{ExplorationError, ExplorationReport, ExploreConfig, Explorer};
use pathspace_solver::Z3Backend;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("unknown demo: {name}")]
    #[diagnostic(
        code(pathspace::unknown_demo),
        help("available demos: {available}")
    )]
    UnknownDemo { name: String, available: String },

    #[error("exploration aborted: {source}")]
    #[diagnostic(
        code(pathspace::exploration),
        help("the verdict for this property cannot be trusted")
    )]
    Exploration {
        #[from]
        source: ExplorationError,
    },
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pathspace", version)]
#[command(about = "Symbolic path exploration over built-in demo properties", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in demo properties
    List,

    /// Explore one demo property, or all of them
    Run {
        /// Demo name (omit to run every demo)
        #[arg(value_name = "DEMO")]
        demo: Option<String>,

        /// Maximum number of iterations (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_iterations: usize,

        /// Time budget for one path, in seconds
        #[arg(long, default_value = "5")]
        per_path_timeout: f64,

        /// Time budget for the whole property, in seconds
        #[arg(long, default_value = "30")]
        per_condition_timeout: f64,

        /// Timeout for one solver check, in seconds
        #[arg(long, default_value = "1")]
        solver_timeout: f64,

        /// Seed for branch choices
        #[arg(long)]
        seed: Option<u64>,

        /// Keep exploring after a refutation
        #[arg(long)]
        keep_going: bool,

        /// Show per-decision debug output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();

    let filter = if matches!(&cli.command, Commands::Run { verbose: true, .. }) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::List => {
            cmd_list();
            Ok(())
        }
        Commands::Run {
            demo,
            max_iterations,
            per_path_timeout,
            per_condition_timeout,
            solver_timeout,
            seed,
            keep_going,
            verbose: _,
        } => {
            let defaults = ExploreConfig::default();
            let config = ExploreConfig {
                max_iterations,
                per_path_timeout: Duration::from_secs_f64(per_path_timeout),
                per_condition_timeout: Duration::from_secs_f64(per_condition_timeout),
                solver_timeout: Duration::from_secs_f64(solver_timeout),
                seed: seed.unwrap_or(defaults.seed),
                stop_on_refutation: !keep_going,
            };
            cmd_run(demo.as_deref(), &config)
        }
    };

    if let Err(e) = result {
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(1);
    }
}

fn cmd_list() {
    for demo in demos::DEMOS {
        println!("{:<18} {}", demo.name, demo.description);
    }
}

fn cmd_run(name: Option<&str>, config: &ExploreConfig) -> CliResult<()> {
    let selected: Vec<&demos::Demo> = match name {
        Some(name) => vec![demos::find(name).ok_or_else(|| CliError::UnknownDemo {
            name: name.to_string(),
            available: demos::DEMOS
                .iter()
                .map(|d| d.name)
                .collect::<Vec<_>>()
                .join(", "),
        })?],
        None => demos::DEMOS.iter().collect(),
    };

    for demo in selected {
        info!(demo = demo.name, "exploring");
        let mut explorer: Explorer<Z3Backend> = Explorer::new(config.clone());
        let report = (demo.run)(&mut explorer)?;
        print_report(demo, &report);
    }
    Ok(())
}

fn print_report(demo: &demos::Demo, report: &ExplorationReport) {
    println!();
    println!("{}: {}", demo.name, demo.description);
    println!("  Result: {report}");
    let stats = &report.stats;
    println!(
        "  Paths: {} ({} ignored, unknown {:.0}%)",
        stats.iterations(),
        stats.ignored(),
        stats.unknown_pct() * 100.0
    );
    for (key, count) in stats.realization_keys() {
        println!("  {key}: {count}");
    }
    for message in &report.analysis.messages {
        println!("  {message}");
    }
}
