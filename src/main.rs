use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authsift::cli::{Cli, Commands};
use authsift::config::Config;
use authsift::mapping::{MappingSet, CANONICAL_FIELDS};
use authsift::Engine;

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)?;
            config.apply_env_overrides();
            config
        }
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Serve => {
            let engine = Engine::new(config)?;
            authsift::server::serve(engine).await
        }
        Commands::ValidateMappings => validate_mappings(&config),
    }
}

fn validate_mappings(config: &Config) -> Result<()> {
    let set = MappingSet::load(&config.paths.mappings)?;
    let errors = set.validate();

    let profiles: Vec<&str> = set
        .profiles
        .keys()
        .filter(|name| !name.starts_with('_'))
        .map(String::as_str)
        .collect();
    println!("Profiles found: {}", if profiles.is_empty() {
        "(none)".to_string()
    } else {
        profiles.join(", ")
    });
    println!(
        "Required canonical fields checked: {}",
        CANONICAL_FIELDS.join(", ")
    );

    if errors.is_empty() {
        println!("OK    All checks passed.");
        Ok(())
    } else {
        for error in &errors {
            eprintln!("FAIL  {error}");
        }
        std::process::exit(1);
    }
}
