pub mod ini;
pub mod models;
pub mod types;

pub use models::{
    AppConfig, BlastConfig, CloudConfig, CloudProvider, ClusterConfig, DbSource, ElasticBlastConfig,
    ElbCommand, MolType, Program,
};
pub use types::{MemoryStr, Percentage, PositiveInteger};
