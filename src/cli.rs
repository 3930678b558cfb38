use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "authsift")]
#[command(author, version, about = "deterministic authentication-event analytics engine")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP engine
    Serve,

    /// Validate the field-mapping profiles and exit
    ValidateMappings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve() {
        let cli = Cli::try_parse_from(["authsift", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve));
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_parses_validate_with_config() {
        let cli = Cli::try_parse_from([
            "authsift",
            "--config",
            "custom.toml",
            "--debug",
            "validate-mappings",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::ValidateMappings));
        assert_eq!(cli.config.unwrap(), PathBuf::from("custom.toml"));
        assert!(cli.debug);
    }
}
