pub mod config;

use std::path::Path;

use clap::{Parser, Subcommand};

use bl_domain::config::Config;

/// botline: conversational chat-bot handlers on a console transport.
#[derive(Debug, Parser)]
#[command(name = "botline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read inbound events as JSON lines from stdin (default when no
    /// subcommand is given).
    Run,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `BL_CONFIG` (or `botline.toml`).  Returns
/// the parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("BL_CONFIG").unwrap_or_else(|_| "botline.toml".into());
    let config = Config::load(Path::new(&config_path))?;
    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["botline"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn config_subcommands_parse() {
        let cli = Cli::try_parse_from(["botline", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
        let cli = Cli::try_parse_from(["botline", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Config(ConfigCommand::Show))));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["botline", "serve"]).is_err());
    }
}
