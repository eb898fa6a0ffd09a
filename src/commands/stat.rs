use anyhow::{Context, Result};

use super::common::{connect, kind_name, permission_string};
use crate::cli::PathArgs;

pub async fn cmd_stat(args: PathArgs) -> Result<()> {
    let client = connect(&args.connect.url).await?;
    let attrs = client
        .lstat(&args.path)
        .await
        .with_context(|| format!("stat {}", args.path))?;

    println!("  Path: {}", args.path);
    println!("  Type: {}", kind_name(&attrs));
    if let Some(size) = attrs.size {
        println!("  Size: {}", size);
    }
    if let Some(mode) = attrs.permissions {
        println!("  Mode: {:o} ({})", mode & 0o7777, permission_string(mode));
    }
    if let Some((uid, gid)) = attrs.owner {
        println!(" Owner: {}:{}", uid, gid);
    }
    if let Some((atime, mtime)) = attrs.times {
        println!("Access: {}", atime);
        println!("Modify: {}", mtime);
    }
    if let Some(blocks) = attrs.blocks() {
        println!("Blocks: {}", blocks);
    }

    client.shutdown().await;
    Ok(())
}
