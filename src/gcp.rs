//! GCP back-end: a GKE cluster driven through `gcloud` and `kubectl`,
//! query batches and metadata in Google Cloud Storage, one Kubernetes job
//! per batch.

use crate::cleanup::CleanupStack;
use crate::config::ElasticBlastConfig;
use crate::constants::{
    ELB_BILLING_LABEL_KEY, ELB_BILLING_LABEL_VALUE, ELB_CLUSTER_NAME_LABEL_KEY,
    ELB_CREATED_BY_LABEL_KEY, ELB_DFLT_GCP_MACHINE_TYPE,
};
use crate::elasticblast::{
    check_markers, check_ownership, ElasticBlast, JobFile, Ownership, StatusReport,
};
use crate::error::Error;
use crate::exec::safe_exec;
use crate::filehelper::FileHelper;
use crate::status::{ElbStatus, JobCounts};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub struct ElasticBlastGcp {
    cfg: ElasticBlastConfig,
    filehelper: FileHelper,
}

impl ElasticBlastGcp {
    pub fn new(cfg: ElasticBlastConfig) -> Result<Self, Error> {
        Ok(Self {
            cfg,
            filehelper: FileHelper::new()?,
        })
    }

    fn cluster_name(&self) -> &str {
        &self.cfg.cluster.name
    }

    fn labels(&self) -> String {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        format!(
            "{ELB_BILLING_LABEL_KEY}={ELB_BILLING_LABEL_VALUE},\
             {ELB_CLUSTER_NAME_LABEL_KEY}={},{ELB_CREATED_BY_LABEL_KEY}={user}",
            self.cluster_name()
        )
    }

    /// GKE cluster status from `gcloud`, or `None` when the cluster does
    /// not exist.
    async fn cluster_status(&self) -> Result<Option<String>, Error> {
        let result = safe_exec(
            "gcloud",
            &[
                "container",
                "clusters",
                "describe",
                self.cluster_name(),
                "--region",
                &self.cfg.cloud.region,
                "--format",
                "value(status)",
            ],
            false,
        )
        .await;
        match result {
            Ok(output) => Ok(Some(output.stdout.trim().to_string())),
            Err(e)
                if {
                    let text = e.to_string().to_lowercase();
                    text.contains("not found") || text.contains("not_found")
                } =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_credentials(&self) -> Result<(), Error> {
        safe_exec(
            "gcloud",
            &[
                "container",
                "clusters",
                "get-credentials",
                self.cluster_name(),
                "--region",
                &self.cfg.cloud.region,
            ],
            self.dry_run(),
        )
        .await
        .map(|_| ())
    }

    /// Job counts from `kubectl get jobs`; failure reasons go into the
    /// detail map.
    async fn count_jobs(&self) -> Result<(JobCounts, BTreeMap<String, String>), Error> {
        let output = safe_exec("kubectl", &["get", "jobs", "-o", "json"], false).await?;
        let parsed: serde_json::Value = serde_json::from_str(&output.stdout)
            .map_err(|e| Error::cluster(format!("unparsable kubectl output: {e}")))?;

        let mut counts = JobCounts::default();
        let mut details = BTreeMap::new();
        let empty = Vec::new();
        for item in parsed["items"].as_array().unwrap_or(&empty) {
            let name = item["metadata"]["name"].as_str().unwrap_or("job");
            let status = &item["status"];
            if status["succeeded"].as_u64().unwrap_or(0) > 0 {
                counts.succeeded += 1;
            } else if status["failed"].as_u64().unwrap_or(0) > 0 {
                counts.failed += 1;
                if let Some(conditions) = status["conditions"].as_array() {
                    if let Some(reason) = conditions
                        .iter()
                        .find_map(|c| c["message"].as_str().filter(|m| !m.is_empty()))
                    {
                        details.insert(name.to_string(), reason.to_string());
                    }
                }
            } else if status["active"].as_u64().unwrap_or(0) > 0 {
                counts.running += 1;
            } else {
                counts.pending += 1;
            }
        }
        Ok((counts, details))
    }

    /// Remove persistent disks left behind by the cluster.
    async fn delete_orphaned_disks(&self) {
        let listing = safe_exec(
            "gcloud",
            &[
                "compute",
                "disks",
                "list",
                "--filter",
                &format!("labels.{ELB_CLUSTER_NAME_LABEL_KEY}={}", self.cluster_name()),
                "--format",
                "value(name,zone)",
            ],
            false,
        )
        .await;
        let Ok(listing) = listing else {
            warn!("could not list persistent disks for cleanup");
            return;
        };
        for line in listing.stdout.lines() {
            let mut fields = line.split_whitespace();
            let (Some(name), Some(zone)) = (fields.next(), fields.next()) else {
                continue;
            };
            if let Err(e) = safe_exec(
                "gcloud",
                &[
                    "compute", "disks", "delete", name, "--zone", zone, "--quiet",
                ],
                false,
            )
            .await
            {
                warn!("could not delete disk {name}: {e}");
            }
        }
    }
}

#[async_trait]
impl ElasticBlast for ElasticBlastGcp {
    fn config(&self) -> &ElasticBlastConfig {
        &self.cfg
    }

    fn dry_run(&self) -> bool {
        self.cfg.cluster.dry_run
    }

    async fn provision(&mut self, cleanup: &mut CleanupStack) -> Result<(), Error> {
        if check_ownership(&self.filehelper, &self.cfg).await? == Ownership::Reattach
            && !self.dry_run()
            && self.cluster_status().await?.is_some()
        {
            info!("reattaching to existing cluster {}", self.cluster_name());
            return self.get_credentials().await;
        }

        let machine_type = self
            .cfg
            .cluster
            .machine_type
            .clone()
            .unwrap_or_else(|| ELB_DFLT_GCP_MACHINE_TYPE.to_string());
        let num_nodes = self.cfg.cluster.num_nodes.to_string();
        let labels = self.labels();

        let mut args = vec![
            "container",
            "clusters",
            "create",
            self.cluster_name(),
            "--region",
            &self.cfg.cloud.region,
            "--machine-type",
            &machine_type,
            "--num-nodes",
            &num_nodes,
            "--labels",
            &labels,
        ];
        if self.cfg.cluster.use_preemptible {
            args.push("--preemptible");
        }
        safe_exec("gcloud", &args, self.dry_run()).await?;

        let cluster_name = self.cluster_name().to_string();
        let region = self.cfg.cloud.region.clone();
        let dry_run = self.dry_run();
        cleanup.push("delete GKE cluster", move || async move {
            safe_exec(
                "gcloud",
                &[
                    "container",
                    "clusters",
                    "delete",
                    &cluster_name,
                    "--region",
                    &region,
                    "--quiet",
                ],
                dry_run,
            )
            .await
            .map(|_| ())
        });

        self.get_credentials().await
    }

    async fn submit_jobs(&mut self, _batches: &[String], jobs: &[JobFile]) -> Result<(), Error> {
        for job in jobs {
            let path = job.local.display().to_string();
            safe_exec("kubectl", &["apply", "-f", &path], self.dry_run()).await?;
        }
        info!("applied {} job descriptors", jobs.len());
        Ok(())
    }

    async fn check_status(&self) -> Result<StatusReport, Error> {
        if let Some(terminal) = check_markers(&self.filehelper, self.cfg.results()).await? {
            return Ok(StatusReport::bare(terminal));
        }
        if self.dry_run() {
            return Ok(StatusReport::bare(ElbStatus::Unknown));
        }

        match self.cluster_status().await? {
            None => return Ok(StatusReport::bare(ElbStatus::Unknown)),
            Some(status) if status == "PROVISIONING" => {
                return Ok(StatusReport::bare(ElbStatus::Creating))
            }
            Some(status) if status == "STOPPING" => {
                return Ok(StatusReport::bare(ElbStatus::Deleting))
            }
            Some(_) => {}
        }

        self.get_credentials().await?;
        let (counts, details) = self.count_jobs().await?;
        let status = if counts.failed > 0 {
            ElbStatus::Failure
        } else if counts.total() > 0 && counts.succeeded == counts.total() {
            ElbStatus::Success
        } else if counts.pending + counts.running > 0 {
            ElbStatus::Running
        } else {
            ElbStatus::Submitting
        };
        Ok(StatusReport {
            status,
            counts,
            details,
        })
    }

    async fn delete(&self) -> Result<(), Error> {
        if self.dry_run() {
            info!("dry-run: would delete cluster {}", self.cluster_name());
            return Ok(());
        }

        // Jobs first, then the cluster, then any disks it leaked
        if self.get_credentials().await.is_ok() {
            if let Err(e) =
                safe_exec("kubectl", &["delete", "jobs", "--all", "--ignore-not-found"], false)
                    .await
            {
                warn!("could not delete jobs: {e}");
            }
        }

        match self.cluster_status().await? {
            None => info!("cluster {} is already gone", self.cluster_name()),
            Some(_) => {
                safe_exec(
                    "gcloud",
                    &[
                        "container",
                        "clusters",
                        "delete",
                        self.cluster_name(),
                        "--region",
                        &self.cfg.cloud.region,
                        "--quiet",
                    ],
                    false,
                )
                .await?;
            }
        }

        self.delete_orphaned_disks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ElasticBlastConfig;

    fn gcp_cfg() -> ElasticBlastConfig {
        ElasticBlastConfig::from_ini(
            "[cloud-provider]\ngcp-region = us-east4\n\
             [blast]\nprogram = blastp\ndb = nr\nqueries = gs://b/q.fa\nresults = gs://b/results\n\
             [cluster]\nname = elasticblast-test\n",
        )
        .unwrap()
    }

    #[test]
    fn test_labels_carry_billing_and_cluster_name() {
        let backend = ElasticBlastGcp::new(gcp_cfg()).unwrap();
        let labels = backend.labels();
        assert!(labels.contains("billingcode=elastic-blast"));
        assert!(labels.contains("cluster-name=elasticblast-test"));
        assert!(labels.contains("created-by="));
    }

    #[tokio::test]
    async fn test_dry_run_submit_executes_nothing() {
        let mut cfg = gcp_cfg();
        cfg.cluster.dry_run = true;
        let mut backend = ElasticBlastGcp::new(cfg).unwrap();
        let jobs = vec![JobFile {
            uri: "gs://b/results/jobs/job_000.yaml".to_string(),
            local: std::path::PathBuf::from("/nonexistent/job_000.yaml"),
        }];
        backend.submit_jobs(&[], &jobs).await.unwrap();
    }
}
