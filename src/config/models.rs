//! Typed configuration records for an ElasticBLAST search.
//!
//! A configuration is assembled from an INI file (`from_ini`), from the
//! frozen JSON copy in the results bucket (`from_json`), or
//! programmatically, then checked with [`ElasticBlastConfig::validate`]
//! against the command about to run. Environment variables override the
//! file for the fields the janitor needs.

use crate::config::ini::Ini;
use crate::config::types::{bool_from_str, MemoryStr, PositiveInteger};
use crate::constants;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Cloud service provider hosting the cluster and the results bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloudProvider {
    Aws,
    Gcp,
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => write!(f, "AWS"),
            Self::Gcp => write!(f, "GCP"),
        }
    }
}

/// Where NCBI-provided databases are downloaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbSource {
    Aws,
    Gcp,
    Ncbi,
}

impl FromStr for DbSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_uppercase().as_str() {
            "AWS" => Ok(Self::Aws),
            "GCP" => Ok(Self::Gcp),
            "NCBI" => Ok(Self::Ncbi),
            other => Err(Error::input(format!("unknown database source '{other}'"))),
        }
    }
}

/// Molecule type of a sequence set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MolType {
    Nucl,
    Prot,
}

/// Supported BLAST program variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    Blastn,
    Blastp,
    Blastx,
    Tblastn,
    Tblastx,
    Rpsblast,
    Rpstblastn,
    Psiblast,
}

impl Program {
    /// Molecule type of the query sequences this program searches with.
    #[must_use]
    pub const fn query_mol_type(self) -> MolType {
        match self {
            Self::Blastn | Self::Blastx | Self::Tblastx | Self::Rpstblastn => MolType::Nucl,
            Self::Blastp | Self::Tblastn | Self::Rpsblast | Self::Psiblast => MolType::Prot,
        }
    }

    /// Molecule type of the database this program searches against.
    #[must_use]
    pub const fn db_mol_type(self) -> MolType {
        match self {
            Self::Blastn | Self::Tblastn | Self::Tblastx => MolType::Nucl,
            Self::Blastp | Self::Blastx | Self::Rpsblast | Self::Rpstblastn | Self::Psiblast => {
                MolType::Prot
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blastn => "blastn",
            Self::Blastp => "blastp",
            Self::Blastx => "blastx",
            Self::Tblastn => "tblastn",
            Self::Tblastx => "tblastx",
            Self::Rpsblast => "rpsblast",
            Self::Rpstblastn => "rpstblastn",
            Self::Psiblast => "psiblast",
        }
    }
}

impl FromStr for Program {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "blastn" => Ok(Self::Blastn),
            "blastp" => Ok(Self::Blastp),
            "blastx" => Ok(Self::Blastx),
            "tblastn" => Ok(Self::Tblastn),
            "tblastx" => Ok(Self::Tblastx),
            "rpsblast" => Ok(Self::Rpsblast),
            "rpstblastn" => Ok(Self::Rpstblastn),
            "psiblast" => Ok(Self::Psiblast),
            other => Err(Error::input(format!("unknown BLAST program '{other}'"))),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Command being executed, used for per-command validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElbCommand {
    Submit,
    Status,
    Delete,
}

/// `[cloud-provider]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub provider: CloudProvider,
    pub region: String,
    /// AWS profile name or GCP project id, when not taken from the
    /// provider's default credential chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

/// `[blast]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastConfig {
    pub program: Program,
    pub db: String,
    pub db_source: DbSource,
    pub batch_len: PositiveInteger,
    pub mem_limit: MemoryStr,
    #[serde(default)]
    pub options: String,
}

/// `[cluster]` section plus the results URI that anchors the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    pub num_nodes: PositiveInteger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<PositiveInteger>,
    #[serde(default)]
    pub use_preemptible: bool,
    pub results: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// Query inputs and user-visible labeling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
}

/// Complete configuration of one ElasticBLAST search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticBlastConfig {
    pub cloud: CloudConfig,
    pub blast: BlastConfig,
    pub cluster: ClusterConfig,
    pub app: AppConfig,
}

impl ElasticBlastConfig {
    /// Build a configuration from INI text with the
    /// `[cloud-provider]`/`[blast]`/`[cluster]` sections.
    pub fn from_ini(text: &str) -> Result<Self, Error> {
        let ini = Ini::parse(text)?;

        let (provider, region, credentials) = match (
            ini.get("cloud-provider", "aws-region"),
            ini.get("cloud-provider", "gcp-region"),
        ) {
            (Some(_), Some(_)) => {
                return Err(Error::input(
                    "config file sets both aws-region and gcp-region; pick one cloud provider",
                ))
            }
            (Some(region), None) => (
                CloudProvider::Aws,
                region.to_string(),
                ini.get("cloud-provider", "aws-profile").map(String::from),
            ),
            (None, Some(region)) => (
                CloudProvider::Gcp,
                region.to_string(),
                ini.get("cloud-provider", "gcp-project").map(String::from),
            ),
            (None, None) => {
                return Err(Error::input(
                    "config file must set aws-region or gcp-region in the [cloud-provider] section",
                ))
            }
        };

        let program: Program = ini
            .get("blast", "program")
            .ok_or_else(|| Error::input("missing required parameter [blast] program"))?
            .parse()?;
        let db = ini
            .get("blast", "db")
            .ok_or_else(|| Error::input("missing required parameter [blast] db"))?
            .to_string();
        let db_source = match ini.get("blast", "db-source") {
            Some(s) => s.parse()?,
            None => match provider {
                CloudProvider::Aws => DbSource::Aws,
                CloudProvider::Gcp => DbSource::Gcp,
            },
        };
        let batch_len = match ini.get("blast", "batch-len") {
            Some(s) => s.parse()?,
            None => PositiveInteger::new(constants::ELB_DFLT_BATCH_LEN)?,
        };
        let mem_limit = match ini.get("blast", "mem-limit") {
            Some(s) => s.parse()?,
            None => MemoryStr::new(constants::ELB_DFLT_MEM_LIMIT)?,
        };
        let options = ini.get("blast", "options").unwrap_or_default().to_string();

        let results = ini
            .get("blast", "results")
            .ok_or_else(|| Error::input("missing required parameter [blast] results"))?
            .to_string();
        let queries = ini
            .get("blast", "queries")
            .map(|q| {
                q.split_whitespace()
                    .map(String::from)
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();
        let run_label = ini.get("blast", "run-label").map(String::from);

        let name = match ini.get("cluster", "name") {
            Some(s) => s.to_string(),
            None => derive_cluster_name(&results),
        };
        let machine_type = ini.get("cluster", "machine-type").map(String::from);
        let num_nodes = match ini.get("cluster", "num-nodes") {
            Some(s) => s.parse()?,
            None => PositiveInteger::new(u64::from(constants::ELB_DFLT_NUM_NODES))?,
        };
        let num_cpus = ini
            .get("cluster", "num-cpus")
            .map(str::parse)
            .transpose()?;
        let use_preemptible = ini
            .get("cluster", "use-preemptible")
            .map(bool_from_str)
            .transpose()?
            .unwrap_or(false);
        let dry_run = ini
            .get("cluster", "dry-run")
            .map(bool_from_str)
            .transpose()?
            .unwrap_or(false);

        let mut cfg = Self {
            cloud: CloudConfig {
                provider,
                region,
                credentials,
            },
            blast: BlastConfig {
                program,
                db,
                db_source,
                batch_len,
                mem_limit,
                options,
            },
            cluster: ClusterConfig {
                name,
                machine_type,
                num_nodes,
                num_cpus,
                use_preemptible,
                results,
                dry_run,
            },
            app: AppConfig { queries, run_label },
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Build a configuration from the frozen JSON copy.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let mut cfg: Self = serde_json::from_str(text)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Serialize this configuration to the canonical frozen JSON form.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply `ELB_RESULTS`, `ELB_CLUSTER_NAME`, and `ELB_DRY_RUN`.
    fn apply_env_overrides(&mut self) {
        if let Ok(results) = std::env::var(constants::ELB_RESULTS_ENV) {
            if !results.is_empty() {
                self.cluster.results = results;
            }
        }
        if let Ok(name) = std::env::var(constants::ELB_CLUSTER_NAME_ENV) {
            if !name.is_empty() {
                self.cluster.name = name;
            }
        }
        if std::env::var(constants::ELB_DRY_RUN_ENV).is_ok() {
            self.cluster.dry_run = true;
        }
    }

    /// Check cross-field rules relevant to `command`.
    pub fn validate(&self, command: ElbCommand) -> Result<(), Error> {
        let results = &self.cluster.results;
        let scheme_ok = match self.cloud.provider {
            CloudProvider::Aws => results.starts_with(constants::ELB_S3_PREFIX),
            CloudProvider::Gcp => results.starts_with(constants::ELB_GCS_PREFIX),
        };
        if !scheme_ok {
            return Err(Error::input(format!(
                "results URI '{results}' does not match cloud provider {} (expected {})",
                self.cloud.provider,
                match self.cloud.provider {
                    CloudProvider::Aws => constants::ELB_S3_PREFIX,
                    CloudProvider::Gcp => constants::ELB_GCS_PREFIX,
                }
            )));
        }
        if self.cluster.name.is_empty() {
            return Err(Error::input("cluster name must not be empty"));
        }
        if command == ElbCommand::Submit && self.app.queries.is_empty() {
            return Err(Error::input(
                "at least one query URI is required to submit a search",
            ));
        }
        Ok(())
    }

    /// Results URI with the trailing slash trimmed.
    #[must_use]
    pub fn results(&self) -> &str {
        self.cluster.results.trim_end_matches('/')
    }
}

/// Derive a cluster name unique to the results URI: the user name plus a
/// truncated digest of the URI, so retries of the same search reattach to
/// the same cluster.
#[must_use]
pub fn derive_cluster_name(results: &str) -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let digest = Sha256::digest(results.trim_end_matches('/').as_bytes());
    let hex: String = digest.iter().take(5).map(|b| format!("{b:02x}")).collect();
    format!("{}-{}-{}", constants::ELB_CLUSTER_NAME_PREFIX, user, hex)
}
