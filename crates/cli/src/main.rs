mod config;
mod logging;
mod serve;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use coa_core::{pending_machines_for, Machine, TestRecord};

use crate::config::Config;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Certificate of analysis workflow: stage resolution and email approvals.
#[derive(Parser)]
#[command(name = "coa", version, about = "Certificate of analysis workflow server")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (overrides config and COA_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Path to a TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON file of certificates and test records to preload
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Resolve the workflow status of a test record JSON file
    Resolve {
        /// Path to the test record JSON file
        file: PathBuf,
        /// Also report which stations are pending for this user
        #[arg(long)]
        user: Option<String>,
        /// Stations the user may operate, comma-separated. Default: all.
        #[arg(long, value_delimiter = ',')]
        machines: Vec<String>,
    },

    /// Print the effective configuration with secrets masked
    Config {
        /// Path to a TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, config, seed } => {
            cmd_serve(port, config.as_deref(), seed.as_deref());
        }
        Commands::Resolve {
            file,
            user,
            machines,
        } => {
            cmd_resolve(&file, user.as_deref(), &machines, cli.output, cli.quiet);
        }
        Commands::Config { config } => {
            cmd_config(config.as_deref(), cli.output, cli.quiet);
        }
    }
}

fn load_config(path: Option<&Path>, port: Option<u16>) -> Result<Config, config::ConfigError> {
    let mut config = Config::load(path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_serve(port: Option<u16>, config_path: Option<&Path>, seed: Option<&Path>) {
    let config = match load_config(config_path, port) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("error: {}", e);
        process::exit(1);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(serve::start_server(config, seed)) {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}

fn cmd_resolve(
    path: &Path,
    user: Option<&str>,
    machines: &[String],
    output: OutputFormat,
    quiet: bool,
) {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => {
            let msg = format!("error: record file not found: {}", path.display());
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let record: TestRecord = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            let msg = format!("error: invalid test record in {}: {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let access: Vec<Machine> = if machines.is_empty() {
        Machine::ALL.to_vec()
    } else {
        match machines
            .iter()
            .map(|m| m.parse::<Machine>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(a) => a,
            Err(e) => {
                report_error(&format!("error: {}", e), output, quiet);
                process::exit(1);
            }
        }
    };
    let pending = user.map(|u| pending_machines_for(&record, u, &access));

    match output {
        OutputFormat::Json => {
            let mut body = serde_json::json!({
                "referenceNo": record.reference_no(),
                "status": record.status(),
                "stage": record.stage(),
                "onHold": record.is_on_hold(),
            });
            if let (Some(user), Some(pending)) = (user, &pending) {
                body["userId"] = serde_json::json!(user);
                body["pendingMachines"] = serde_json::json!(pending);
            }
            match serde_json::to_string_pretty(&body) {
                Ok(s) => println!("{}", s),
                Err(e) => {
                    report_error(&format!("error: {}", e), output, quiet);
                    process::exit(1);
                }
            }
        }
        OutputFormat::Text => {
            println!(
                "{}: {} (stage {})",
                record.reference_no(),
                record.status(),
                record.stage()
            );
            if let Some(hold) = record.hold() {
                println!("  on hold by {}: {}", hold.held_by, hold.reason);
            }
            if let (Some(user), Some(pending)) = (user, &pending) {
                if pending.is_empty() {
                    println!("  nothing pending for {}", user);
                } else {
                    let names: Vec<&str> = pending.iter().map(Machine::as_str).collect();
                    println!("  pending for {}: {}", user, names.join(", "));
                }
            }
        }
    }
}

fn cmd_config(path: Option<&Path>, output: OutputFormat, quiet: bool) {
    let mut config = match load_config(path, None) {
        Ok(c) => c,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    };
    config.mask_secrets();

    let rendered = match output {
        OutputFormat::Json => serde_json::to_string_pretty(&config).map_err(|e| e.to_string()),
        OutputFormat::Text => toml::to_string_pretty(&config).map_err(|e| e.to_string()),
    };
    match rendered {
        Ok(s) => println!("{}", s),
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

/// Report an error message in the appropriate output format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
