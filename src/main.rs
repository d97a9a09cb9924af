use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use s3resolver::shell::{ShellCompleter, ShellState};
use s3resolver::{ResolutionEngine, ResolverConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Resolve s3:// asset identifiers to locally cached files
#[derive(Parser, Debug)]
#[command(name = "s3resolver", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache root directory (overrides USD_S3_CACHE_PATH)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Custom S3 endpoint URL (overrides USD_S3_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve identifiers without fetching
    Resolve { paths: Vec<String> },
    /// Resolve and download identifiers into the cache
    Fetch { paths: Vec<String> },
    /// Fetch identifiers and show their cache entries
    Stat {
        /// Print one JSON object per identifier
        #[arg(long)]
        json: bool,
        ids: Vec<String>,
    },
    /// Interactive shell
    Shell,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("s3resolver=warn"),
        1 => EnvFilter::new("s3resolver=info"),
        _ => EnvFilter::new("s3resolver=debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let mut config = ResolverConfig::from_env()?;
    if let Some(dir) = cli.cache_dir {
        config = config.with_cache_root(dir);
    }
    if let Some(endpoint) = cli.endpoint {
        config = config.with_endpoint(endpoint);
    }

    let engine = Arc::new(ResolutionEngine::from_config(&config)?);
    let mut state = ShellState::new(engine);

    match cli.command {
        Commands::Resolve { paths } => state.execute_command("resolve", &paths),
        Commands::Fetch { paths } => state.execute_command("fetch", &paths),
        Commands::Stat { json, mut ids } => {
            if json {
                ids.push("--json".to_string());
            }
            state.execute_command("stat", &ids)
        }
        Commands::Shell => run_shell(&mut state),
    }
}

fn run_shell(state: &mut ShellState) -> anyhow::Result<()> {
    println!("{}", "=".repeat(60).cyan());
    println!("{}", "  s3resolver - S3 asset resolver shell".bold().cyan());
    println!(
        "{}",
        format!("  cache root: {}", state.engine().cache_root().display()).cyan()
    );
    println!("{}", "=".repeat(60).cyan());
    println!();
    println!("Type 'help' for available commands or 'exit' to quit");
    println!();

    let completer = ShellCompleter::new(Arc::clone(state.engine()), state.command_names());
    let mut rl: Editor<ShellCompleter, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(completer));

    let history_file = dirs::home_dir().map(|mut p| {
        p.push(".s3resolver_history");
        p
    });

    if let Some(path) = &history_file {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = state.prompt();

        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                if let Err(e) = state.execute(&line) {
                    if e.to_string() == "exit" {
                        break;
                    }
                    eprintln!("{} {:#}", "Error:".red().bold(), e);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("exit");
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red().bold(), err);
                break;
            }
        }
    }

    if let Some(path) = &history_file {
        let _ = rl.save_history(path);
    }

    println!("Goodbye!");
    Ok(())
}
