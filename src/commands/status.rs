//! The `status` command: report search state, optionally polling until
//! terminal.

use crate::config::ElbCommand;
use crate::constants::{ELB_FAILURE_MESSAGE, ELB_STATUS_POLL_INTERVAL_SECS};
use crate::elasticblast::create_elastic_blast;
use crate::error::Error;
use crate::filehelper::FileHelper;
use crate::status::ElbStatus;
use std::time::Duration;
use tracing::debug;

/// Check (and with `wait`, poll) the status of the search anchored at
/// `results`. Returns the process exit code.
pub async fn status(
    results: &str,
    wait: bool,
    verbose: bool,
    exit_code: bool,
) -> Result<i32, Error> {
    let filehelper = FileHelper::new()?;
    let cfg = filehelper.thaw_config(results).await?;
    cfg.validate(ElbCommand::Status)?;
    let backend = create_elastic_blast(cfg.clone()).await?;

    let report = loop {
        let report = backend.check_status().await?;
        debug!("status: {}", report.status);
        if !wait || report.status.is_terminal() {
            break report;
        }
        tokio::time::sleep(Duration::from_secs(ELB_STATUS_POLL_INTERVAL_SECS)).await;
    };

    if exit_code && report.status == ElbStatus::Failure {
        // Promote bug reporting even when only the exit code was asked for
        println!("{ELB_FAILURE_MESSAGE}");
    }
    if !exit_code || verbose {
        match report.status {
            ElbStatus::Success => {
                println!(
                    "Your ElasticBLAST search succeeded, results can be found in {}",
                    cfg.results()
                );
            }
            ElbStatus::Failure => {
                if !exit_code {
                    println!("{ELB_FAILURE_MESSAGE}");
                }
                if !verbose {
                    if let Some(reason) = report.details.values().next() {
                        println!("{reason}");
                    }
                }
            }
            ElbStatus::Running if report.counts.total() > 0 => {
                println!("{}", report.counts);
            }
            other => println!("{other}"),
        }
        if verbose && !report.details.is_empty() {
            for (job, detail) in &report.details {
                println!("{job}: {detail}");
            }
        }
    }

    Ok(if exit_code {
        report.status.exit_code()
    } else {
        0
    })
}
