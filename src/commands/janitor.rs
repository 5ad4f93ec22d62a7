//! The `janitor` command: entry point for the scheduled cleanup sweep.
//!
//! Driven by environment variables so the cloud's scheduled-invocation
//! service can call it without a config file: `ELB_RESULTS` names the
//! search, `ELB_CLUSTER_NAME` optionally overrides the cluster, and
//! `ELB_DRY_RUN` disables all actions.

use crate::config::ElbCommand;
use crate::constants::ELB_RESULTS_ENV;
use crate::elasticblast::create_elastic_blast;
use crate::error::Error;
use crate::filehelper::FileHelper;

/// Run one janitor sweep over the search named by `ELB_RESULTS`.
pub async fn janitor() -> Result<(), Error> {
    let results = std::env::var(ELB_RESULTS_ENV)
        .map_err(|_| Error::input(format!("missing required parameter {ELB_RESULTS_ENV}")))?;

    let filehelper = FileHelper::new()?;
    let cfg = filehelper.thaw_config(&results).await?;
    cfg.validate(ElbCommand::Status)?;
    let backend = create_elastic_blast(cfg).await?;
    crate::janitor::janitor(backend.as_ref(), &filehelper).await
}
