//! Configuration loading, validation, and freeze/thaw round-trips.

use elastic_blast::config::{
    CloudProvider, DbSource, ElasticBlastConfig, ElbCommand, Program,
};
use elastic_blast::filehelper::FileHelper;

const FULL_INI: &str = "\
[cloud-provider]
gcp-region = us-east4
gcp-project = my-project

[blast]
program = blastp
db = nr
db-source = NCBI
queries = gs://bucket/queries.faa.gz
results = gs://bucket/results
batch-len = 10000
mem-limit = 44G
options = -evalue 1e-5
run-label = nightly

[cluster]
name = elasticblast-nightly
machine-type = n1-highmem-16
num-nodes = 4
num-cpus = 16
use-preemptible = yes
";

#[test]
fn test_full_ini_parses() {
    let cfg = ElasticBlastConfig::from_ini(FULL_INI).unwrap();
    assert_eq!(cfg.cloud.provider, CloudProvider::Gcp);
    assert_eq!(cfg.cloud.region, "us-east4");
    assert_eq!(cfg.cloud.credentials.as_deref(), Some("my-project"));
    assert_eq!(cfg.blast.program, Program::Blastp);
    assert_eq!(cfg.blast.db_source, DbSource::Ncbi);
    assert_eq!(cfg.blast.batch_len.get(), 10_000);
    assert_eq!(cfg.blast.mem_limit.as_str(), "44G");
    assert_eq!(cfg.blast.options, "-evalue 1e-5");
    assert_eq!(cfg.cluster.name, "elasticblast-nightly");
    assert_eq!(cfg.cluster.num_nodes.get(), 4);
    assert!(cfg.cluster.use_preemptible);
    assert_eq!(cfg.app.run_label.as_deref(), Some("nightly"));
    cfg.validate(ElbCommand::Submit).unwrap();
}

#[test]
fn test_json_round_trip_preserves_everything() {
    let cfg = ElasticBlastConfig::from_ini(FULL_INI).unwrap();
    let json = cfg.to_json().unwrap();
    let back = ElasticBlastConfig::from_json(&json).unwrap();
    assert_eq!(back, cfg);
}

/// The frozen copy in the results location is authoritative for later
/// commands: thaw(freeze(c)) = c.
#[tokio::test]
async fn test_freeze_thaw_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results").display().to_string();
    let ini = FULL_INI.replace("gs://bucket/results", &results);
    let cfg = ElasticBlastConfig::from_ini(&ini).unwrap();

    let fh = FileHelper::new().unwrap();
    fh.freeze_config(&cfg).await.unwrap();

    // The canonical object lands at metadata/elastic-blast-config.json
    let frozen_path = dir
        .path()
        .join("results/metadata/elastic-blast-config.json");
    assert!(frozen_path.exists());

    let thawed = fh.thaw_config(&results).await.unwrap();
    assert_eq!(thawed, cfg);
}

#[tokio::test]
async fn test_thaw_without_search_fails() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("nothing-here").display().to_string();
    let fh = FileHelper::new().unwrap();
    let err = fh.thaw_config(&results).await.unwrap_err();
    assert!(err.to_string().contains("do not hold"), "{err}");
}

#[test]
fn test_batch_len_must_be_positive() {
    let ini = FULL_INI.replace("batch-len = 10000", "batch-len = 0");
    assert!(ElasticBlastConfig::from_ini(&ini).is_err());
}

#[test]
fn test_num_nodes_must_be_positive() {
    let ini = FULL_INI.replace("num-nodes = 4", "num-nodes = 0");
    assert!(ElasticBlastConfig::from_ini(&ini).is_err());
}

#[test]
fn test_bad_memory_literal_rejected() {
    let ini = FULL_INI.replace("mem-limit = 44G", "mem-limit = lots");
    assert!(ElasticBlastConfig::from_ini(&ini).is_err());
}

#[test]
fn test_unknown_program_rejected() {
    let ini = FULL_INI.replace("program = blastp", "program = hyperblast");
    assert!(ElasticBlastConfig::from_ini(&ini).is_err());
}
