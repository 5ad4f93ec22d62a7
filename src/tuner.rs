//! Cluster shape derivation: multi-threading mode, cores, batch length,
//! memory limit, and machine type from database and query properties.
//!
//! Every function here is a deterministic mapping from its inputs; the
//! same workload always produces the same cluster shape.

use crate::config::{MemoryStr, MolType, Program};
use crate::error::Error;
use crate::filehelper::FileHelper;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// Summary of a sequence set: total letters and molecule type.
#[derive(Debug, Clone, Copy)]
pub struct SeqData {
    pub length: u64,
    pub mol_type: MolType,
}

/// Database properties read from the provider metadata file.
#[derive(Debug, Clone, Copy)]
pub struct DbData {
    pub mol_type: MolType,
    pub length: u64,
    pub bytes_to_cache: u64,
}

/// How a single BLAST process parallelizes: over the database partition
/// (the engine default) or over the query chunk (`-mt_mode 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtMode {
    SplitByDatabase,
    SplitByQueries,
}

impl fmt::Display for MtMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SplitByDatabase => Ok(()),
            Self::SplitByQueries => write!(f, "-mt_mode 1"),
        }
    }
}

/// Database bytes-to-cache must exceed this multiple of the query letter
/// count before threading by database pays off.
const MT_DB_TO_QUERY_FACTOR: u64 = 10;

/// Cores assigned to a database-split job.
const NUM_CPUS_SPLIT_BY_DB: u32 = 16;

/// Ceiling on cores assigned to a query-split job.
const MAX_NUM_CPUS_SPLIT_BY_QUERIES: u32 = 16;

/// Residues/bases one thread can keep busy in query-split mode.
const PROT_LETTERS_PER_CPU: u64 = 10_000;
const NUCL_LETTERS_PER_CPU: u64 = 2_500_000;

/// Per-program query batch lengths for query-split searches.
#[must_use]
pub const fn default_batch_length(program: Program) -> u64 {
    match program {
        Program::Blastn => 5_000_000,
        Program::Blastp => 10_000,
        Program::Blastx => 20_004,
        Program::Tblastn => 20_000,
        Program::Tblastx | Program::Psiblast | Program::Rpsblast | Program::Rpstblastn => 100_000,
    }
}

/// Provider metadata colocated with a BLAST database (`<db>.njs`/`.pjs`).
#[derive(Debug, Deserialize)]
struct DbMetadata {
    #[serde(rename = "dbtype")]
    dbtype: String,
    #[serde(rename = "number-of-letters")]
    number_of_letters: u64,
    #[serde(rename = "bytes-to-cache")]
    bytes_to_cache: u64,
}

/// Base location of NCBI-provided databases for each source.
fn db_bucket(source: crate::config::DbSource) -> &'static str {
    match source {
        crate::config::DbSource::Aws => "s3://ncbi-blast-databases",
        crate::config::DbSource::Gcp => "gs://blast-db",
        crate::config::DbSource::Ncbi => "https://ftp.ncbi.nlm.nih.gov/blast/db",
    }
}

/// Fetch database metadata from the file colocated with the database.
///
/// A `db` given as a full URI is treated as user-provided; otherwise the
/// database is looked up in the source's standard bucket.
pub async fn get_db_data(
    filehelper: &FileHelper,
    db: &str,
    mol_type: MolType,
    source: crate::config::DbSource,
) -> Result<DbData, Error> {
    let suffix = match mol_type {
        MolType::Nucl => "njs",
        MolType::Prot => "pjs",
    };
    // Bare names are NCBI-provided databases in the source's standard
    // bucket; anything with a path separator is user-provided
    let uri = if db.contains('/') {
        format!("{db}.{suffix}")
    } else {
        format!("{}/{db}.{suffix}", db_bucket(source))
    };
    debug!("reading database metadata from {uri}");

    let bytes = filehelper
        .get_bytes(&uri)
        .await
        .map_err(|e| e.with_context(&format!("metadata for database '{db}'")))?;
    let meta: DbMetadata = serde_json::from_slice(&bytes)
        .map_err(|e| Error::malformed_input(format!("database metadata {uri}: {e}")))?;

    let mol_from_meta = match meta.dbtype.to_lowercase().as_str() {
        "nucleotide" => MolType::Nucl,
        "protein" => MolType::Prot,
        other => {
            return Err(Error::malformed_input(format!(
                "database metadata {uri} reports unknown dbtype '{other}'"
            )))
        }
    };
    if mol_from_meta != mol_type {
        return Err(Error::input(format!(
            "database '{db}' molecule type does not match the requested program"
        )));
    }

    Ok(DbData {
        mol_type: mol_from_meta,
        length: meta.number_of_letters,
        bytes_to_cache: meta.bytes_to_cache,
    })
}

/// Programs whose searches benefit from threading by database.
const fn supports_db_split(program: Program) -> bool {
    matches!(
        program,
        Program::Blastn | Program::Blastp | Program::Blastx | Program::Tblastn
    )
}

/// Decide the multi-threading mode. An explicit `-mt_mode` in the user
/// options always wins.
#[must_use]
pub fn get_mt_mode(program: Program, options: &str, db: &DbData, query: &SeqData) -> MtMode {
    if let Some(explicit) = parse_mt_mode_option(options) {
        return explicit;
    }
    if supports_db_split(program)
        && db.bytes_to_cache >= MT_DB_TO_QUERY_FACTOR.saturating_mul(query.length)
    {
        MtMode::SplitByDatabase
    } else {
        MtMode::SplitByQueries
    }
}

fn parse_mt_mode_option(options: &str) -> Option<MtMode> {
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "-mt_mode" {
            return match tokens.next() {
                Some("1") => Some(MtMode::SplitByQueries),
                Some(_) => Some(MtMode::SplitByDatabase),
                None => None,
            };
        }
    }
    None
}

/// Cores per job. Query-split jobs scale with query length down to a
/// single core for small inputs.
#[must_use]
pub fn get_num_cpus(program: Program, mt_mode: MtMode, query: &SeqData) -> u32 {
    match mt_mode {
        MtMode::SplitByDatabase => NUM_CPUS_SPLIT_BY_DB,
        MtMode::SplitByQueries => {
            let per_cpu = match program.query_mol_type() {
                MolType::Prot => PROT_LETTERS_PER_CPU,
                MolType::Nucl => NUCL_LETTERS_PER_CPU,
            };
            let cpus = query.length / per_cpu;
            u32::try_from(cpus.clamp(1, u64::from(MAX_NUM_CPUS_SPLIT_BY_QUERIES)))
                .unwrap_or(MAX_NUM_CPUS_SPLIT_BY_QUERIES)
        }
    }
}

/// Per-job batch length. Database-split jobs take proportionally more
/// query per job since the cores share one database scan.
#[must_use]
pub fn get_batch_length(program: Program, mt_mode: MtMode, num_cpus: u32) -> u64 {
    let base = default_batch_length(program);
    match mt_mode {
        MtMode::SplitByDatabase => base.saturating_mul(u64::from(num_cpus)),
        MtMode::SplitByQueries => base,
    }
}

fn gb_limit(bytes: u64, factor: f64) -> MemoryStr {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let gb = ((bytes as f64) * factor / 1e9).ceil() as u64;
    MemoryStr::new(format!("{}G", gb.max(1))).expect("generated memory literal is valid")
}

/// Memory limit per AWS Batch job: the database-scaled figure when a
/// factor is configured, otherwise the constant limit.
#[must_use]
pub fn aws_get_mem_limit(db: &DbData, const_limit: &MemoryStr, db_factor: f64) -> MemoryStr {
    if db_factor > 0.0 {
        gb_limit(db.bytes_to_cache, db_factor)
    } else {
        const_limit.clone()
    }
}

/// Memory limit per GKE job; one job per instance is assumed, so the
/// limit scales with the database.
#[must_use]
pub fn gcp_get_mem_limit(db: &DbData, db_factor: f64) -> MemoryStr {
    gb_limit(db.bytes_to_cache, db_factor)
}

/// (name, vCPUs, memory in GB), each family ordered smallest first.
type InstanceType = (&'static str, u32, u32);

const AWS_C_FAMILY: [InstanceType; 8] = [
    ("c5.large", 2, 4),
    ("c5.xlarge", 4, 8),
    ("c5.2xlarge", 8, 16),
    ("c5.4xlarge", 16, 32),
    ("c5.9xlarge", 36, 72),
    ("c5.12xlarge", 48, 96),
    ("c5.18xlarge", 72, 144),
    ("c5.24xlarge", 96, 192),
];

const AWS_M_FAMILY: [InstanceType; 8] = [
    ("m5.large", 2, 8),
    ("m5.xlarge", 4, 16),
    ("m5.2xlarge", 8, 32),
    ("m5.4xlarge", 16, 64),
    ("m5.8xlarge", 32, 128),
    ("m5.12xlarge", 48, 192),
    ("m5.16xlarge", 64, 256),
    ("m5.24xlarge", 96, 384),
];

const AWS_R_FAMILY: [InstanceType; 8] = [
    ("r5.large", 2, 16),
    ("r5.xlarge", 4, 32),
    ("r5.2xlarge", 8, 64),
    ("r5.4xlarge", 16, 128),
    ("r5.8xlarge", 32, 256),
    ("r5.12xlarge", 48, 384),
    ("r5.16xlarge", 64, 512),
    ("r5.24xlarge", 96, 768),
];

/// Pick the smallest instance type with enough vCPUs and enough memory
/// for the jobs it will co-host. The family follows the memory:cpu ratio
/// of one job: compute-heavy searches land on C5, balanced on M5, and
/// memory-bound on R5.
#[must_use]
pub fn aws_get_machine_type(mem_limit: &MemoryStr, num_cpus: u32, region: &str) -> String {
    let mem_gb = mem_limit.as_gb();
    let ratio = mem_gb / f64::from(num_cpus.max(1));
    let family: &[InstanceType] = if ratio <= 1.0 {
        &AWS_C_FAMILY
    } else if ratio <= 4.0 {
        &AWS_M_FAMILY
    } else {
        &AWS_R_FAMILY
    };
    debug!("selecting instance type for region {region}");

    for &(name, vcpus, mem) in family {
        if vcpus < num_cpus {
            continue;
        }
        let jobs_per_instance = (vcpus / num_cpus.max(1)).max(1);
        if f64::from(mem) >= mem_gb * f64::from(jobs_per_instance) {
            return name.to_string();
        }
    }
    // Nothing in the preferred family fits; take the largest R5
    AWS_R_FAMILY[AWS_R_FAMILY.len() - 1].0.to_string()
}

/// Pick a predefined GCP machine type covering both the core count and
/// the memory limit, using the high-memory profile (6.5 GB per vCPU).
#[must_use]
pub fn gcp_get_machine_type(mem_limit: &MemoryStr, num_cpus: u32) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mem_cpus = (mem_limit.as_gb() / 6.5).ceil() as u32;
    let cpus = num_cpus.max(mem_cpus).max(1);
    let cpus = cpus.next_power_of_two().min(96);
    format!("n1-highmem-{cpus}")
}
