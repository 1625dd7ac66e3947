//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Protected, metered, pay-per-call MCP tool gateway
#[derive(Parser, Debug)]
#[command(name = "mcp-tollgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_TOLLGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MCP_TOLLGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MCP_TOLLGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_TOLLGATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_TOLLGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Print the storable hash of an API key, for `auth.api_keys[].hash`
    HashKey {
        /// Plaintext key; read from stdin when omitted
        key: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["mcp-tollgate", "--port", "9000"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn hash_key_takes_optional_argument() {
        let cli = Cli::try_parse_from(["mcp-tollgate", "hash-key", "tg_abc"]).unwrap();
        assert!(matches!(cli.command, Some(Command::HashKey { key: Some(ref k) }) if k == "tg_abc"));

        let cli = Cli::try_parse_from(["mcp-tollgate", "hash-key"]).unwrap();
        assert!(matches!(cli.command, Some(Command::HashKey { key: None })));
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["mcp-tollgate", "check-config", "-c", "tollgate.yaml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
        assert_eq!(cli.config, Some(PathBuf::from("tollgate.yaml")));
    }
}
