use anyhow::{Context, Result};
use tracing::debug;

use super::common::connect;
use crate::cli::LsArgs;

pub async fn cmd_ls(args: LsArgs) -> Result<()> {
    let client = connect(&args.connect.url).await?;
    let mut items = client
        .read_dir(&args.path)
        .await
        .with_context(|| format!("listing {}", args.path))?;
    debug!(target: "wsfs::ls", path = %args.path, count = items.len(), "listed");

    items.sort_by(|a, b| a.filename.cmp(&b.filename));
    for item in &items {
        if args.long {
            println!("{}", item.longname);
        } else {
            println!("{}", item.filename);
        }
    }

    client.shutdown().await;
    Ok(())
}
