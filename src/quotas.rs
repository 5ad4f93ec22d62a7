//! Pre-flight cloud quota checks.
//!
//! Run before provisioning so a search that cannot get resources fails in
//! seconds with a readable diagnostic instead of half-building a cluster.

use crate::config::{CloudProvider, ElasticBlastConfig};
use crate::error::Error;
use crate::resilience::with_timeout;
use tracing::{debug, warn};

const OUT_OF_QUOTA_MSG: &str = "ElasticBLAST cannot create the necessary AWS resources ({}) to run your search. Please run elastic-blast delete on searches that have already completed.";

/// Verify the provider has room for this search. Skipped under dry-run.
pub async fn check_resource_quotas(cfg: &ElasticBlastConfig) -> Result<(), Error> {
    if cfg.cluster.dry_run {
        return Ok(());
    }
    match cfg.cloud.provider {
        CloudProvider::Aws => check_aws(cfg).await,
        CloudProvider::Gcp => {
            // No GCP quota API is wired up; GKE reports quota failures at
            // cluster-creation time
            debug!("resource check for GCP is delegated to cluster creation");
            Ok(())
        }
    }
}

async fn check_aws(cfg: &ElasticBlastConfig) -> Result<(), Error> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(cfg.cloud.region.clone()));
    if let Some(profile) = &cfg.cloud.credentials {
        loader = loader.profile_name(profile);
    }
    let sdk_config = loader.load().await;
    let quotas = aws_sdk_servicequotas::Client::new(&sdk_config);
    let batch = aws_sdk_batch::Client::new(&sdk_config);

    let job_queue_limit = find_quota(&quotas, "batch", "Job queue limit").await?;
    let compute_env_limit = find_quota(&quotas, "batch", "Compute environment limit").await?;
    let num_job_queues = count_job_queues(&batch).await?;
    let num_compute_envs = count_compute_environments(&batch).await?;
    debug!(
        "AWS Batch usage: {num_job_queues} job queues (limit {job_queue_limit:?}), \
         {num_compute_envs} compute environments (limit {compute_env_limit:?})"
    );

    if let Some(limit) = job_queue_limit {
        #[allow(clippy::cast_precision_loss)]
        if (num_job_queues + 1) as f64 >= limit {
            return Err(Error::dependency(
                OUT_OF_QUOTA_MSG.replace("{}", "batch job queue"),
            ));
        }
    }
    if let Some(limit) = compute_env_limit {
        #[allow(clippy::cast_precision_loss)]
        if (num_compute_envs + 1) as f64 >= limit {
            return Err(Error::dependency(
                OUT_OF_QUOTA_MSG.replace("{}", "batch compute environment"),
            ));
        }
    }

    check_aws_vcpus(cfg, &quotas).await
}

/// vCPU quota: smaller than one instance is fatal, smaller than the
/// requested fleet is a warning (the fleet is clamped, the search slows).
async fn check_aws_vcpus(
    cfg: &ElasticBlastConfig,
    quotas: &aws_sdk_servicequotas::Client,
) -> Result<(), Error> {
    let Some(num_cpus) = cfg.cluster.num_cpus else {
        // Optimal/unspecified instance types resolve vCPUs only at
        // cluster creation
        return Ok(());
    };

    let quota_name = if cfg.cluster.use_preemptible {
        "All Standard (A, C, D, H, I, M, R, T, Z) Spot Instance Requests"
    } else {
        "Running On-Demand Standard (A, C, D, H, I, M, R, T, Z) instances"
    };
    let Some(limit) = find_quota(quotas, "ec2", quota_name).await? else {
        warn!("EC2 vCPU limit was not found");
        return Ok(());
    };

    #[allow(clippy::cast_precision_loss)]
    let per_instance = num_cpus.get() as f64;
    if limit < per_instance {
        return Err(Error::dependency(format!(
            "Your account has a quota limit of {limit} vCPUs, but the instance type selected \
             to run BLAST searches needs {per_instance}. Please increase your quota \
             \"{quota_name}\" in service \"EC2\" or use a smaller instance type."
        )));
    }
    #[allow(clippy::cast_precision_loss)]
    let fleet = per_instance * cfg.cluster.num_nodes.get() as f64;
    if limit < fleet {
        warn!(
            "ElasticBLAST is configured to use up to {fleet} vCPUs, but only {limit} can be \
             used in your account. This limits how much work can run in parallel."
        );
    }
    Ok(())
}

async fn find_quota(
    client: &aws_sdk_servicequotas::Client,
    service_code: &str,
    quota_name: &str,
) -> Result<Option<f64>, Error> {
    let mut next_token: Option<String> = None;
    loop {
        let output = with_timeout("list service quotas", async {
            client
                .list_service_quotas()
                .service_code(service_code)
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| Error::dependency(format!("cannot read AWS service quotas: {e}")))
        })
        .await?;
        for quota in output.quotas() {
            if quota.quota_name() == Some(quota_name) {
                return Ok(quota.value());
            }
        }
        match output.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => return Ok(None),
        }
    }
}

async fn count_job_queues(client: &aws_sdk_batch::Client) -> Result<usize, Error> {
    let mut count = 0;
    let mut next_token: Option<String> = None;
    loop {
        let output = with_timeout("describe job queues", async {
            client
                .describe_job_queues()
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| Error::dependency(format!("cannot list AWS Batch job queues: {e}")))
        })
        .await?;
        count += output.job_queues().len();
        match output.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => return Ok(count),
        }
    }
}

async fn count_compute_environments(client: &aws_sdk_batch::Client) -> Result<usize, Error> {
    let mut count = 0;
    let mut next_token: Option<String> = None;
    loop {
        let output = with_timeout("describe compute environments", async {
            client
                .describe_compute_environments()
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| {
                    Error::dependency(format!("cannot list AWS Batch compute environments: {e}"))
                })
        })
        .await?;
        count += output.compute_environments().len();
        match output.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => return Ok(count),
        }
    }
}
