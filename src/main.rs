use clap::{Parser, Subcommand};
use redictum::logging::{self, Verbosity};
use redictum::{config, daemon, panic_handler};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "redictum")]
#[command(author, version, about = "Hold a hotkey, speak, release: dictation for the Linux desktop", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Run in foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Check daemon status
    Status,

    /// Check dependencies and complete one-time setup
    Init,

    /// Configure settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn main() -> ExitCode {
    panic_handler::install();
    let cli = Cli::parse();
    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);

    // `start` sets up its own logging once it knows where the daemon lives.
    if !matches!(cli.command, Commands::Start { .. }) {
        logging::init_stderr(verbosity, "info");
    }

    let result = match cli.command {
        Commands::Start { foreground } => daemon::start(foreground, verbosity),
        Commands::Stop => daemon::stop(),
        Commands::Status => daemon::status(),
        Commands::Init => daemon::init(),
        Commands::Config { show } => {
            let shown = if show {
                config::show()
            } else {
                config::Config::config_path()
                    .map(|path| println!("Config file: {}", path.display()))
                    .map_err(Into::into)
            };
            return match shown {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    ExitCode::FAILURE
                }
            };
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
