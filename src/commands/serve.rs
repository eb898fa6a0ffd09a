//! `wsfs serve`: expose one directory over WebSockets.

use anyhow::{Context, Result};
use sftp_pipe::server::{LocalFilesystem, SafeFilesystem, ServerConfig, SessionOptions, SftpServer};
use tracing::info;

use crate::cli::ServeArgs;

pub async fn cmd_serve(args: ServeArgs) -> Result<()> {
    let options = SessionOptions::default()
        .read_only(args.read_only)
        .hide_uid_gid(args.hide_uid_gid);

    // Refuse to start unless the root is an existing directory.
    let fs = SafeFilesystem::new(LocalFilesystem::new(), &args.root, options)
        .with_context(|| format!("serving {}", args.root))?;

    let mut config = ServerConfig::default().span(tracing::info_span!("server"));
    if let Some(budget) = args.readdir_budget {
        config = config.readdir_budget(budget);
    }

    info!(
        target: "wsfs::serve",
        root = %fs.root().display(),
        read_only = args.read_only,
        hide_uid_gid = args.hide_uid_gid,
        "serving"
    );

    let server = SftpServer::with_config(fs, config);
    tokio::select! {
        result = server.serve(&args.listen) => result,
        _ = tokio::signal::ctrl_c() => {
            info!(target: "wsfs::serve", "shutting down");
            Ok(())
        }
    }
}
