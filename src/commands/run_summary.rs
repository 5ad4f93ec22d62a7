//! The `run-summary` command: one JSON report of a search's final shape.

use crate::config::ElbCommand;
use crate::elasticblast::create_elastic_blast;
use crate::error::Error;
use crate::filehelper::FileHelper;
use crate::status::JobCounts;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct RunSummary {
    version: &'static str,
    cluster_name: String,
    cloud_provider: String,
    program: String,
    db: String,
    results: String,
    status: String,
    #[serde(flatten)]
    counts: JobCounts,
    num_jobs: usize,
}

/// Produce the run report for the search anchored at `results`, written
/// to `out` or stdout.
pub async fn run_summary(results: &str, out: Option<&str>) -> Result<(), Error> {
    let filehelper = FileHelper::new()?;
    let cfg = filehelper.thaw_config(results).await?;
    cfg.validate(ElbCommand::Status)?;
    let backend = create_elastic_blast(cfg.clone()).await?;
    let report = backend.check_status().await?;

    let summary = RunSummary {
        version: env!("CARGO_PKG_VERSION"),
        cluster_name: cfg.cluster.name.clone(),
        cloud_provider: cfg.cloud.provider.to_string(),
        program: cfg.blast.program.to_string(),
        db: cfg.blast.db.clone(),
        results: cfg.results().to_string(),
        status: report.status.to_string(),
        counts: report.counts,
        num_jobs: report.counts.total(),
    };
    let text = serde_json::to_string_pretty(&summary)?;

    match out {
        Some(path) => std::fs::write(path, text)?,
        None => println!("{text}"),
    }
    Ok(())
}
