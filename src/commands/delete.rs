//! The `delete` command: tear down the resources of a search.

use crate::config::ElbCommand;
use crate::elasticblast::create_elastic_blast;
use crate::error::Error;
use crate::filehelper::FileHelper;

/// Delete the cluster and jobs of the search anchored at `results`.
/// Results and metadata markers stay in the bucket.
pub async fn delete(results: &str) -> Result<(), Error> {
    let filehelper = FileHelper::new()?;
    let cfg = filehelper.thaw_config(results).await?;
    cfg.validate(ElbCommand::Delete)?;
    let backend = create_elastic_blast(cfg).await?;
    backend.delete().await
}
