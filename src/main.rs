use anyhow::Context;
use clap::{Parser, Subcommand};
use fibrant::config::AppConfig;
use fibrant::effect::{Exit, Parallelism};
use fibrant::gauge::ResourceGauge;
use fibrant::runtime::{FiberHandle, Runtime};
use fibrant::todos::{list_items, with_api, HttpTodoApi, ListItem, ListOptions};
use indicatif::{ProgressBar, ProgressStyle};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// Fetch todos and join them with their owners
#[derive(Parser)]
#[command(name = "fibrant")]
#[command(about = "Structured-concurrency effect runtime demo: todos joined with users", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the todo list and print each item with its owner
    List {
        /// Concurrent user lookups (a positive integer or "unbounded")
        #[arg(short = 'p', long)]
        parallelism: Option<Parallelism>,

        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Interrupt the run after this long (e.g. "5s", "750ms")
        #[arg(long, value_parser = humantime::parse_duration)]
        deadline: Option<Duration>,

        /// Print the items as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
}

impl Commands {
    fn config_path(&self) -> Option<&PathBuf> {
        match self {
            Commands::List { config, .. } | Commands::Config { config } => config.as_ref(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.command.config_path().map(PathBuf::as_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let log_level = match cli.verbose {
        0 => config.log_level.clone().unwrap_or_else(|| "info".to_string()),
        1 => "debug".to_string(),
        2 => "trace".to_string(),
        _ => "trace,hyper=debug,tower=debug".to_string(), // -vvv shows everything including dependencies
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("fibrant started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::List {
            parallelism,
            deadline,
            json,
            ..
        } => run_list(config, parallelism, deadline, json).await,
        Commands::Config { .. } => print_config(&config),
    };

    match result {
        Ok(Outcome::Completed) => {}
        Ok(Outcome::Interrupted) => {
            eprintln!("Interrupted");
            std::process::exit(130); // Standard exit code for SIGINT
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

enum Outcome {
    Completed,
    Interrupted,
}

fn print_config(config: &AppConfig) -> anyhow::Result<Outcome> {
    print!("{}", config.to_toml()?);
    Ok(Outcome::Completed)
}

async fn run_list(
    config: AppConfig,
    parallelism: Option<Parallelism>,
    deadline: Option<Duration>,
    json: bool,
) -> anyhow::Result<Outcome> {
    let api = Arc::new(HttpTodoApi::new(&config.api)?);
    info!("Fetching todos from {}", api.base_url());

    let spinner = loading_spinner();
    let gauge = ResourceGauge::builder()
        .on_transition({
            let spinner = spinner.clone();
            move |busy| {
                if busy {
                    spinner.set_message("Loading users...");
                    spinner.enable_steady_tick(Duration::from_millis(100));
                } else {
                    spinner.disable_steady_tick();
                    spinner.set_message("");
                }
            }
        })
        .build();

    let mut options = ListOptions::from_config(&config.fetch, gauge);
    if let Some(parallelism) = parallelism {
        options = options.with_parallelism(parallelism);
    }
    debug!("User lookups run with parallelism {}", options.parallelism);

    let runtime = Runtime::builder().name("fibrant").build()?;
    let (tx, rx) = oneshot::channel();
    let handle = runtime.run(with_api(list_items(options), api), move |exit| {
        let _ = tx.send(exit);
    });

    setup_interrupt_handlers(handle.clone())?;
    if let Some(deadline) = deadline {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !handle.is_done() {
                warn!("Deadline of {:?} reached, interrupting", deadline);
                handle.interrupt();
            }
        });
    }

    let exit = rx.await.context("Runtime dropped the run before it finished")?;
    spinner.finish_and_clear();

    match exit {
        Exit::Success(items) => {
            print_items(&items, json)?;
            Ok(Outcome::Completed)
        }
        Exit::Failure(e) => Err(anyhow::Error::new(e).context("Failed to build the todo list")),
        Exit::Interrupted => Ok(Outcome::Interrupted),
        Exit::Died(defect) => Err(anyhow::Error::new(defect).context("Runtime defect")),
    }
}

/// Interrupt the run on SIGINT or SIGTERM; a second signal exits immediately.
fn setup_interrupt_handlers(handle: FiberHandle) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::spawn(move || {
        let mut interrupted = false;
        for sig in signals.forever() {
            if interrupted {
                std::process::exit(130);
            }
            info!("Received signal {}, interrupting {}", sig, handle.id());
            handle.interrupt();
            interrupted = true;
        }
    });

    Ok(())
}

fn loading_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        bar.set_style(style.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "));
    }
    bar
}

fn print_items(items: &[ListItem], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }

    for item in items {
        let mark = if item.completed { "x" } else { " " };
        println!("{:>4} [{}] {} (@{})", item.id, mark, item.title, item.username);
    }
    println!("{} item(s)", items.len());
    Ok(())
}
