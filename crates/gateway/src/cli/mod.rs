pub mod archive;
pub mod ask;
pub mod config;

use clap::{Parser, Subcommand};

/// studysync: conversation store and AI study assistant gateway.
#[derive(Debug, Parser)]
#[command(name = "studysync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Ask the completion service one question and print the answer.
    Ask {
        /// The question to send.
        question: String,
        /// Wait for the whole answer instead of streaming tokens.
        #[arg(long)]
        no_stream: bool,
    },
    /// Archive all but the newest messages of a conversation in the local store.
    Archive {
        conversation_id: String,
        /// Messages to keep hot (defaults to `retention.keep_last`).
        #[arg(long)]
        keep_last: Option<usize>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `SS_CONFIG` (or
/// `config.toml` by default). A missing file yields the defaults.
/// Returns the parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(ss_domain::config::Config, String)> {
    let config_path = std::env::var("SS_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<ss_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(ss_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config_from("/nonexistent/studysync.toml").unwrap();
        assert_eq!(config.server.port, 3210);
    }

    #[test]
    fn file_overrides_are_applied() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retention]\nkeep_last = 42\n").unwrap();
        let config = load_config_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.retention.keep_last, 42);
        assert_eq!(config.retention.soft_quota, 500);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let err = load_config_from(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }

    #[test]
    fn cli_parses_archive_flags() {
        let cli = Cli::parse_from(["studysync", "archive", "c1", "--keep-last", "10"]);
        match cli.command {
            Some(Command::Archive { conversation_id, keep_last }) => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(keep_last, Some(10));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
