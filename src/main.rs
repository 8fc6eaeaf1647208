mod commands;
mod core;
mod error;
mod types;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "izunpack",
    version,
    about = "Unpack installer payloads, build an uninstaller and run post-install actions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install from an installer directory
    Install {
        #[arg(short = 'i', long, default_value = ".")]
        installer: PathBuf,

        #[arg(short = 't', long)]
        target: Option<PathBuf>,

        /// Packs to install (defaults to the preselected packs)
        #[arg(short = 'p', long = "pack")]
        packs: Vec<String>,

        /// Installer variable as NAME=VALUE
        #[arg(long = "var", value_parser = parse_key_value)]
        variables: Vec<(String, String)>,

        #[arg(long)]
        properties: Option<PathBuf>,

        /// Never prompt; questions take their default answer
        #[arg(long)]
        auto: bool,

        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Replay a recorded install script
    Auto {
        #[arg(short = 'i', long, default_value = ".")]
        installer: PathBuf,

        #[arg(short = 's', long)]
        script: PathBuf,
    },

    /// Write a properties template for unattended installs
    Template {
        #[arg(short = 'i', long, default_value = ".")]
        installer: PathBuf,

        #[arg(short = 'o', long, default_value = "./install.properties")]
        output: PathBuf,
    },

    /// Show what an uninstaller jar records
    Inspect {
        #[arg(short = 'u', long)]
        uninstaller: PathBuf,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty variable name in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Install {
            installer,
            target,
            packs,
            variables,
            properties,
            auto,
            yes,
        } => commands::install::install(&types::InstallOptions {
            installer,
            target,
            packs,
            variables,
            properties,
            automated: auto,
            assume_yes: yes,
        }),
        Commands::Auto { installer, script } => commands::auto::auto(&installer, &script),
        Commands::Template { installer, output } => {
            commands::template::template(&installer, &output)
        }
        Commands::Inspect { uninstaller } => {
            commands::inspect::inspect(&uninstaller).map(|_| ())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("PORT=80=80").unwrap(),
            ("PORT".to_string(), "80=80".to_string())
        );
        assert!(parse_key_value("PORT").is_err());
        assert!(parse_key_value("=1").is_err());
    }
}
