// Copyright 2026 Placeharvest Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(
    name = "placeharvest",
    about = "placeharvest: adaptive extraction of business listings from map place pages",
    version,
    after_help = "Run 'placeharvest <command> --help' for details on each command."
)]
struct Cli {
    /// Suppress progress output and informational logs
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every place listed in an input file
    Run {
        /// Input file: one JSON object or bare identifier per line
        #[arg(long, short)]
        input: PathBuf,
        /// Output JSONL file (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Maximum simultaneous extractions
        #[arg(long)]
        concurrency: Option<usize>,
        /// Budget for one extraction attempt in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Collect review snippets
        #[arg(long)]
        reviews: bool,
        /// Collect image URLs
        #[arg(long)]
        images: bool,
        /// Proxy URL. Can be repeated.
        #[arg(long = "proxy")]
        proxies: Vec<String>,
        /// File with one proxy URL per line
        #[arg(long)]
        proxy_file: Option<PathBuf>,
        /// Locale hint, e.g. "en" or "pt-BR"
        #[arg(long)]
        locale: Option<String>,
        /// Maximum entries per search query
        #[arg(long)]
        max_results: Option<usize>,
        /// Query tag for input lines that do not carry one (required if any line lacks one)
        #[arg(long, default_value = "")]
        query: String,
        /// Show the browser window
        #[arg(long)]
        headful: bool,
    },
    /// Validate the configuration and print it as JSON
    CheckConfig {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check the browser, configuration and selector set
    Doctor {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "placeharvest=debug"
    } else if cli.quiet {
        "placeharvest=warn"
    } else {
        "placeharvest=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            config,
            concurrency,
            timeout_ms,
            reviews,
            images,
            proxies,
            proxy_file,
            locale,
            max_results,
            query,
            headful,
        } => {
            let args = cli::run_cmd::RunArgs {
                input,
                output,
                config,
                concurrency,
                timeout_ms,
                reviews,
                images,
                proxies,
                proxy_file,
                locale,
                max_results,
                query,
                headful,
            };
            cli::run_cmd::run(args, cli.quiet).await
        }
        Commands::CheckConfig { config } => cli::check_config::run(config.as_deref()),
        Commands::Doctor { config } => cli::doctor::run(config.as_deref()).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "placeharvest", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli.quiet {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
