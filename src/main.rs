use clap::Parser;
use colored::Colorize;
use pysift::cli::Cli;
use pysift::error::Result;
use pysift::locator::ArtifactResolver;
use pysift::output::{self, OutputFormat};
use pysift::pipeline::Engine;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            std::process::exit(2);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let config = cli.load_config()?;
    let references = cli.resolve_targets()?;
    let resolver = ArtifactResolver::new(cli.mirror.clone(), cli.downloads.clone());
    let engine = Engine::new(config, resolver)?;

    let results = engine.scan_all(&references);

    match cli.format {
        OutputFormat::Json => println!("{}", output::render_json(&results, engine.config())?),
        OutputFormat::Text => output::print_text(&results, engine.config()),
    }

    let threshold = engine.config().min_report_score;
    let flagged = results.iter().any(|r| r.score >= threshold.max(1));
    let failed = results.iter().any(|r| r.error.is_some());
    Ok(if flagged || failed { 1 } else { 0 })
}
