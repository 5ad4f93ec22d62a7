use clap::Parser;
use elastic_blast::cli::{Cli, Commands};
use elastic_blast::commands;
use elastic_blast::config::ElasticBlastConfig;
use elastic_blast::constants::ELB_RESULTS_ENV;
use elastic_blast::error::Error;
use elastic_blast::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.logfile, cli.loglevel.as_str());

    match run_command(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run_command(cli: Cli) -> Result<i32, Error> {
    match cli.command {
        Commands::Submit {} => {
            let cfg = load_config(&cli)?;
            commands::submit::submit(cfg).await?;
            Ok(0)
        }
        Commands::Status {
            wait,
            verbose,
            exit_code,
        } => {
            let results = resolve_results(&cli)?;
            commands::status::status(&results, wait, verbose, exit_code).await
        }
        Commands::Delete {} => {
            let results = resolve_results(&cli)?;
            commands::delete::delete(&results).await?;
            Ok(0)
        }
        Commands::RunSummary { ref out } => {
            let results = resolve_results(&cli)?;
            commands::run_summary::run_summary(&results, out.as_deref()).await?;
            Ok(0)
        }
        Commands::Janitor {} => {
            commands::janitor::janitor().await?;
            Ok(0)
        }
    }
}

/// Read and parse the INI configuration named by `--cfg`.
fn load_config(cli: &Cli) -> Result<ElasticBlastConfig, Error> {
    let path = cli
        .cfg
        .as_ref()
        .ok_or_else(|| Error::input("--cfg is required for this command"))?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::input(format!("cannot read {}: {e}", path.display())))?;
    let mut cfg = ElasticBlastConfig::from_ini(&text)?;
    if cli.dry_run {
        cfg.cluster.dry_run = true;
    }
    Ok(cfg)
}

/// The results URI for commands operating on an existing search: from the
/// config file when given, otherwise from `ELB_RESULTS`.
fn resolve_results(cli: &Cli) -> Result<String, Error> {
    if cli.cfg.is_some() {
        return Ok(load_config(cli)?.results().to_string());
    }
    std::env::var(ELB_RESULTS_ENV).map_err(|_| {
        Error::input(format!(
            "provide --cfg or set {ELB_RESULTS_ENV} to locate the search"
        ))
    })
}
