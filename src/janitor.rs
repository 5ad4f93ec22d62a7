//! The janitor: a periodic, idempotent sweep that detects terminal
//! searches, memoizes their outcome as a marker object, and releases
//! their cluster.

use crate::constants::{ELB_STATUS_FAILURE, ELB_STATUS_SUCCESS};
use crate::elasticblast::ElasticBlast;
use crate::error::Error;
use crate::filehelper::{metadata_uri, FileHelper};
use crate::status::ElbStatus;
use tracing::{debug, warn};

/// Write an empty marker object unless it is already present.
async fn write_marker_if_absent(
    filehelper: &FileHelper,
    results: &str,
    marker: &str,
) -> Result<(), Error> {
    let uri = metadata_uri(results, marker);
    if filehelper.exists(&uri).await? {
        return Ok(());
    }
    filehelper.put_bytes(&uri, b"").await
}

/// One janitor pass over a single search.
///
/// Terminal states get their marker written and the cluster deleted;
/// in-flight states are logged and left alone. Safe to call any number
/// of times.
pub async fn janitor(elb: &dyn ElasticBlast, filehelper: &FileHelper) -> Result<(), Error> {
    let report = elb.check_status().await?;
    let results = elb.config().results().to_string();
    let cluster_name = elb.config().cluster.name.clone();

    match report.status {
        ElbStatus::Success => {
            write_marker_if_absent(filehelper, &results, ELB_STATUS_SUCCESS).await?;
            debug!(
                "search with results on {results} is DONE, deleting it (cluster name {cluster_name})"
            );
            elb.delete().await?;
        }
        ElbStatus::Failure => {
            write_marker_if_absent(filehelper, &results, ELB_STATUS_FAILURE).await?;
            debug!(
                "search with results on {results} has FAILED, deleting it (cluster name {cluster_name})"
            );
            elb.delete().await?;
        }
        ElbStatus::Creating => {
            debug!("search on {results} is still being initialized (cluster name {cluster_name})");
        }
        ElbStatus::Submitting => {
            debug!("search on {results} is performing job submission (cluster name {cluster_name})");
        }
        ElbStatus::Running => {
            debug!("search with results on {results} is still running (cluster name {cluster_name})");
        }
        ElbStatus::Deleting => {
            debug!("search on {results} is being deleted (cluster name {cluster_name})");
        }
        ElbStatus::Unknown => {
            if elb.dry_run() {
                warn!(
                    "unknown status on {results} because of dry-run option (cluster name {cluster_name})"
                );
            } else {
                warn!(
                    "unknown or expired search with results on {results} (cluster name {cluster_name})"
                );
            }
        }
    }
    Ok(())
}
