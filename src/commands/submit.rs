//! The `submit` command: validate, pre-flight, provision, split, submit.

use crate::cleanup::CleanupStack;
use crate::config::{ElasticBlastConfig, ElbCommand};
use crate::constants::{ELB_JOB_DIR, ELB_QUERY_BATCH_DIR};
use crate::elasticblast::{check_ownership, create_elastic_blast, JobFile};
use crate::error::Error;
use crate::filehelper::FileHelper;
use crate::jobs::{read_job_template, write_job_files};
use crate::quotas::check_resource_quotas;
use crate::split::FastaReader;
use std::collections::HashMap;
use tracing::info;

/// Run a complete submission. On any error the cleanup stack unwinds all
/// partially provisioned cloud state before the error is returned.
pub async fn submit(cfg: ElasticBlastConfig) -> Result<(), Error> {
    cfg.validate(ElbCommand::Submit)?;
    check_resource_quotas(&cfg).await?;

    let mut filehelper = FileHelper::new()?;
    // Fail before any provisioning when the results URI belongs to a
    // different search
    check_ownership(&filehelper, &cfg).await?;

    let mut cleanup = CleanupStack::new();
    let result = tokio::select! {
        result = run_submit(&cfg, &mut filehelper, &mut cleanup) => result,
        _ = tokio::signal::ctrl_c() => {
            Err(Error::input("submission interrupted"))
        }
    };
    match result {
        Ok(()) => {
            cleanup.disarm();
            Ok(())
        }
        Err(e) => {
            cleanup.unwind().await;
            Err(e)
        }
    }
}

async fn run_submit(
    cfg: &ElasticBlastConfig,
    filehelper: &mut FileHelper,
    cleanup: &mut CleanupStack,
) -> Result<(), Error> {
    for query in &cfg.app.queries {
        filehelper.check_for_read(query).await?;
    }

    let mut backend = create_elastic_blast(cfg.clone()).await?;
    backend.provision(cleanup).await?;

    if cfg.cluster.dry_run {
        info!("dry-run: would freeze configuration to {}", cfg.results());
    } else {
        filehelper.freeze_config(cfg).await?;
    }

    let streams = filehelper.open_queries(&cfg.app.queries).await?;
    let out_path = format!("{}/{ELB_QUERY_BATCH_DIR}", cfg.results());
    let outcome = FastaReader::new(filehelper, cfg.blast.batch_len.get(), &out_path)
        .read_and_cut(streams)?;
    if outcome.batches.is_empty() {
        return Err(Error::empty_input("the query contains no sequences"));
    }
    info!(
        "split {} letters into {} batches",
        outcome.total_count,
        outcome.batches.len()
    );

    let job_path = format!("{}/{ELB_JOB_DIR}", cfg.results());
    let job_uris = write_job_files(
        filehelper,
        &job_path,
        read_job_template(),
        &outcome.batches,
        &job_substitutions(cfg),
    )?;
    let job_files: Vec<JobFile> = filehelper
        .staged_uploads()
        .iter()
        .filter(|staged| job_uris.contains(&staged.uri))
        .map(|staged| JobFile {
            uri: staged.uri.clone(),
            local: staged.path.clone(),
        })
        .collect();

    filehelper.copy_to_bucket(cfg.cluster.dry_run).await?;
    backend.submit_jobs(&outcome.batches, &job_files).await?;
    Ok(())
}

fn job_substitutions(cfg: &ElasticBlastConfig) -> HashMap<String, String> {
    let num_cpus = cfg.cluster.num_cpus.map_or(16, |n| n.get());
    HashMap::from([
        ("RESULTS".to_string(), cfg.results().to_string()),
        (
            "ELB_BLAST_PROGRAM".to_string(),
            cfg.blast.program.to_string(),
        ),
        ("ELB_DB".to_string(), cfg.blast.db.clone()),
        ("ELB_BLAST_OPTIONS".to_string(), cfg.blast.options.clone()),
        (
            "ELB_MEM_LIMIT".to_string(),
            cfg.blast.mem_limit.to_string(),
        ),
        (
            "ELB_MEM_REQUEST".to_string(),
            cfg.blast.mem_limit.to_string(),
        ),
        ("ELB_NUM_CPUS".to_string(), num_cpus.to_string()),
        (
            "ELB_DOCKER_IMAGE".to_string(),
            "ncbi/elasticblast-elb".to_string(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_substitutions_cover_template_variables() {
        let cfg = ElasticBlastConfig::from_ini(
            "[cloud-provider]\naws-region = us-east-1\n\
             [blast]\nprogram = blastn\ndb = nt\nqueries = q.fa\nresults = s3://b/r\n",
        )
        .unwrap();
        let subs = job_substitutions(&cfg);
        // Every template variable except the per-batch ones must resolve
        for var in [
            "RESULTS",
            "ELB_BLAST_PROGRAM",
            "ELB_DB",
            "ELB_MEM_LIMIT",
            "ELB_MEM_REQUEST",
            "ELB_NUM_CPUS",
            "ELB_DOCKER_IMAGE",
        ] {
            assert!(subs.contains_key(var), "missing {var}");
        }
    }
}
