//! The cloud back-end capability set and its factory.
//!
//! A back-end owns one search: it can provision the cluster, submit one
//! job per query batch, classify the aggregate state, and tear everything
//! down. The factory picks the AWS or GCP variant from the configuration.

use crate::aws::ElasticBlastAws;
use crate::cleanup::CleanupStack;
use crate::config::{CloudProvider, ElasticBlastConfig};
use crate::constants::{ELB_META_CONFIG_FILE, ELB_STATUS_FAILURE, ELB_STATUS_SUCCESS};
use crate::error::Error;
use crate::filehelper::{metadata_uri, FileHelper};
use crate::gcp::ElasticBlastGcp;
use crate::status::{ElbStatus, JobCounts};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One job descriptor produced at submit time: its bucket URI and the
/// staged local copy.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub uri: String,
    pub local: PathBuf,
}

/// Everything `check_status` observed about a search.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: ElbStatus,
    pub counts: JobCounts,
    /// Per-job diagnostics for verbose output, e.g. failure reasons
    pub details: BTreeMap<String, String>,
}

impl StatusReport {
    #[must_use]
    pub fn bare(status: ElbStatus) -> Self {
        Self {
            status,
            counts: JobCounts::default(),
            details: BTreeMap::new(),
        }
    }
}

/// Operations every cloud back-end provides.
#[async_trait]
pub trait ElasticBlast: Send {
    fn config(&self) -> &ElasticBlastConfig;

    fn dry_run(&self) -> bool;

    /// Create the cluster, or reattach if this search already owns one.
    /// Pushes compensating actions for everything it allocates.
    async fn provision(&mut self, cleanup: &mut CleanupStack) -> Result<(), Error>;

    /// Submit one job per batch, in batch order. At-least-once: jobs must
    /// be idempotent on their results objects.
    async fn submit_jobs(&mut self, batches: &[String], jobs: &[JobFile]) -> Result<(), Error>;

    /// Observe cluster and job state and map it to a lifecycle state.
    async fn check_status(&self) -> Result<StatusReport, Error>;

    /// Tear down compute resources in reverse dependency order,
    /// tolerating already-gone state. Metadata markers are preserved.
    async fn delete(&self) -> Result<(), Error>;
}

/// Instantiate the back-end matching the configured cloud provider.
pub async fn create_elastic_blast(
    cfg: ElasticBlastConfig,
) -> Result<Box<dyn ElasticBlast>, Error> {
    match cfg.cloud.provider {
        CloudProvider::Aws => Ok(Box::new(ElasticBlastAws::new(cfg).await?)),
        CloudProvider::Gcp => Ok(Box::new(ElasticBlastGcp::new(cfg)?)),
    }
}

/// Outcome of probing the results URI for an existing search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No frozen config present; the URI is free to claim
    Fresh,
    /// A frozen config identical to ours exists; reattach to the cluster
    Reattach,
}

/// Provisioning guard: the presence of a frozen config marks ownership of
/// the results URI. A matching config means reattach; a different one is
/// another search's territory.
pub async fn check_ownership(
    filehelper: &FileHelper,
    cfg: &ElasticBlastConfig,
) -> Result<Ownership, Error> {
    let uri = metadata_uri(cfg.results(), ELB_META_CONFIG_FILE);
    if !filehelper.exists(&uri).await? {
        return Ok(Ownership::Fresh);
    }
    let frozen = filehelper.thaw_config(cfg.results()).await?;
    if &frozen == cfg {
        Ok(Ownership::Reattach)
    } else {
        Err(Error::already_exists(cfg.results()))
    }
}

/// Terminal state recorded by the janitor, if any. Markers short-circuit
/// cloud queries once a search is done.
pub async fn check_markers(
    filehelper: &FileHelper,
    results: &str,
) -> Result<Option<ElbStatus>, Error> {
    if filehelper
        .exists(&metadata_uri(results, ELB_STATUS_SUCCESS))
        .await?
    {
        return Ok(Some(ElbStatus::Success));
    }
    if filehelper
        .exists(&metadata_uri(results, ELB_STATUS_FAILURE))
        .await?
    {
        return Ok(Some(ElbStatus::Failure));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_cfg(results: &str) -> ElasticBlastConfig {
        let ini = format!(
            "[cloud-provider]\naws-region = us-east-1\n\
             [blast]\nprogram = blastn\ndb = nt\nqueries = q.fa\nresults = {results}\n"
        );
        ElasticBlastConfig::from_ini(&ini).unwrap()
    }

    #[tokio::test]
    async fn test_ownership_fresh_then_reattach() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results").display().to_string();
        let cfg = local_cfg(&results);
        let fh = FileHelper::new().unwrap();

        assert_eq!(check_ownership(&fh, &cfg).await.unwrap(), Ownership::Fresh);
        fh.freeze_config(&cfg).await.unwrap();
        assert_eq!(
            check_ownership(&fh, &cfg).await.unwrap(),
            Ownership::Reattach
        );
    }

    #[tokio::test]
    async fn test_ownership_conflict_is_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results").display().to_string();
        let cfg = local_cfg(&results);
        let fh = FileHelper::new().unwrap();
        fh.freeze_config(&cfg).await.unwrap();

        let mut other = cfg;
        other.blast.db = "nr".to_string();
        let err = check_ownership(&fh, &other).await.unwrap_err();
        assert!(err.to_string().contains("already hold"));
    }

    #[tokio::test]
    async fn test_markers_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results").display().to_string();
        let fh = FileHelper::new().unwrap();

        assert_eq!(check_markers(&fh, &results).await.unwrap(), None);
        fh.put_bytes(&metadata_uri(&results, ELB_STATUS_SUCCESS), b"")
            .await
            .unwrap();
        assert_eq!(
            check_markers(&fh, &results).await.unwrap(),
            Some(ElbStatus::Success)
        );
    }
}
