use anyhow::{Context, Result};
use sftp_pipe::{FileAttrs, OpenFlags};
use std::os::unix::fs::PermissionsExt;
use tracing::info;

use super::common::connect;
use crate::cli::PutArgs;

/// Upload a local file, replacing the remote one.
pub async fn cmd_put(args: PutArgs) -> Result<()> {
    let mode = tokio::fs::metadata(&args.local)
        .await
        .with_context(|| format!("stat {}", args.local))?
        .permissions()
        .mode();
    let data = tokio::fs::read(&args.local)
        .await
        .with_context(|| format!("reading {}", args.local))?;

    let client = connect(&args.connect.url).await?;
    let handle = client
        .open(
            &args.remote,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC,
            Some(FileAttrs::new().with_permissions(mode & 0o777)),
        )
        .await
        .with_context(|| format!("creating {}", args.remote))?;

    let written = client.write(&handle, 0, &data).await;
    let closed = client.close(&handle).await;
    written.with_context(|| format!("writing {}", args.remote))?;
    closed?;

    info!(target: "wsfs::put", local = %args.local, remote = %args.remote, bytes = data.len(), "uploaded");
    client.shutdown().await;
    Ok(())
}
