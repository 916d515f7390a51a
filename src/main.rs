use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use treedex::config::{LogFormat, LoggingSection};
use treedex::{CliApp, CliArgs, TreedexConfig};

fn init_tracing(logging: &LoggingSection, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let directive = format!("treedex={}", level)
        .parse::<Directive>()
        .context("Invalid logging level")?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = TreedexConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    CliApp::apply_overrides(&mut config, &args);

    init_tracing(&config.logging, args.verbose)?;
    if args.no_color {
        colored::control::set_override(false);
    }

    let app = CliApp::new(config, args.verbose);
    app.run(args.command).await
}
