use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use colored::Colorize;
use trackshift::client::RestClient;
use trackshift::config::Config;
use trackshift::migrate;

#[derive(Parser)]
#[command(
    name = "trackshift",
    version,
    about = "Reconcile an issue-tracker export into a live target tracker"
)]
struct Cli {
    /// Path to the run configuration
    #[arg(long, global = true, default_value = "config.yml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the export and resolve the taxonomy without writing anything
    Validate,
    /// Bind and create users only
    Users {
        /// Also update the account status of users that already exist
        #[arg(long)]
        patch: bool,
    },
    /// Run the full migration pipeline
    Migrate,
    /// Forget migrated projects so they can be re-migrated
    Cleanup {
        /// Source project keys to forget
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Retry deferred cross-project relations
    Drain,
}

fn run(cli: Cli) -> trackshift::error::Result<()> {
    let config = Config::load(&cli.config)?;
    let client = RestClient::new(&config.target_url, &config.target_api_key);

    match cli.command {
        Commands::Validate => {
            migrate::validate(&config, &client)?;
            println!("{}", "Everything resolves, ready to migrate.".green());
        }
        Commands::Users { patch } => {
            migrate::run_users(&config, &client, patch)?.print();
        }
        Commands::Migrate => {
            migrate::run_full(&config, &client)?.print();
        }
        Commands::Cleanup { codes } => {
            migrate::run_cleanup(&config, &codes)?;
        }
        Commands::Drain => {
            migrate::run_drain(&config, &client)?.print();
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    match trackshift::build_info::git_sha() {
        Some(sha) => println!("trackshift ({sha})"),
        None => println!("trackshift"),
    }

    let started = Instant::now();
    if let Err(e) = run(cli) {
        eprintln!("{} {e}", "error:".red());
        std::process::exit(1);
    }
    println!("Done, it took {} seconds", started.elapsed().as_secs());
}
