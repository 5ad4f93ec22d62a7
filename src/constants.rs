//! Centralized constants for the ElasticBLAST orchestrator
//!
//! This module contains commonly used literals to:
//! - Reduce string duplication
//! - Improve maintainability
//! - Ensure consistency across the codebase

// Object-store layout under the results URI
pub const ELB_METADATA_DIR: &str = "metadata";
pub const ELB_META_CONFIG_FILE: &str = "elastic-blast-config.json";
pub const ELB_STATUS_SUCCESS: &str = "SUCCESS";
pub const ELB_STATUS_FAILURE: &str = "FAILURE";
pub const ELB_JOB_IDS_FILE: &str = "job-ids.json";
pub const ELB_QUERY_BATCH_DIR: &str = "query_batches";
pub const ELB_JOB_DIR: &str = "jobs";

// File-name prefixes for generated artifacts
pub const ELB_QUERY_BATCH_FILE_PREFIX: &str = "batch_";
pub const ELB_JOB_FILE_PREFIX: &str = "job_";

// URI schemes
pub const ELB_S3_PREFIX: &str = "s3://";
pub const ELB_GCS_PREFIX: &str = "gs://";
pub const ELB_HTTP_PREFIX: &str = "http://";
pub const ELB_HTTPS_PREFIX: &str = "https://";

// Environment variables consumed by the janitor and the CLI
pub const ELB_RESULTS_ENV: &str = "ELB_RESULTS";
pub const ELB_CLUSTER_NAME_ENV: &str = "ELB_CLUSTER_NAME";
pub const ELB_DRY_RUN_ENV: &str = "ELB_DRY_RUN";

// Resource labels applied to every cloud resource created for a search
pub const ELB_BILLING_LABEL_KEY: &str = "billingcode";
pub const ELB_BILLING_LABEL_VALUE: &str = "elastic-blast";
pub const ELB_CLUSTER_NAME_LABEL_KEY: &str = "cluster-name";
pub const ELB_CREATED_BY_LABEL_KEY: &str = "created-by";

// Defaults
pub const ELB_DFLT_BATCH_LEN: u64 = 5_000_000;
pub const ELB_DFLT_NUM_NODES: u32 = 1;
pub const ELB_DFLT_AWS_REGION: &str = "us-east-1";
pub const ELB_DFLT_GCP_REGION: &str = "us-east4";
pub const ELB_DFLT_GCP_MACHINE_TYPE: &str = "n1-standard-32";
pub const ELB_DFLT_MEM_LIMIT: &str = "20G";

// Cloud API behavior
pub const ELB_CLOUD_API_TIMEOUT_SECS: u64 = 60;
pub const ELB_STATUS_POLL_INTERVAL_SECS: u64 = 20;

// Cluster naming
pub const ELB_CLUSTER_NAME_PREFIX: &str = "elasticblast";

// AWS Batch resource names derived from the cluster name
pub const ELB_AWS_JOB_QUEUE_SUFFIX: &str = "-queue";
pub const ELB_AWS_COMPUTE_ENV_SUFFIX: &str = "-compute-env";
pub const ELB_AWS_JOB_DEF_SUFFIX: &str = "-job-def";

// FASTA suffixes accepted for query inputs, optionally followed by
// compression or archive suffixes
pub const ELB_FASTA_SUFFIXES: [&str; 4] = [".fa", ".fasta", ".fna", ".faa"];

// User-facing messages
pub const ELB_FAILURE_MESSAGE: &str = "Your ElasticBLAST search failed, please help us improve ElasticBLAST by reporting this failure as described in https://blast.ncbi.nlm.nih.gov/doc/elastic-blast/support.html";
