use anyhow::{Context, Result};
use sftp_pipe::protocol::charset::Utf8Decoder;
use sftp_pipe::protocol::MAX_READ_BLOCK_LENGTH;
use sftp_pipe::OpenFlags;
use std::io::Write;

use super::common::connect;
use crate::cli::PathArgs;

/// Stream a remote file to stdout, decoding UTF-8 across block boundaries.
pub async fn cmd_cat(args: PathArgs) -> Result<()> {
    let client = connect(&args.connect.url).await?;
    let handle = client
        .open(&args.path, OpenFlags::READ, None)
        .await
        .with_context(|| format!("opening {}", args.path))?;

    let mut decoder = Utf8Decoder::new();
    let mut text = String::new();
    let mut offset = 0u64;
    let mut stdout = std::io::stdout();
    loop {
        let block = client
            .read(&handle, offset, MAX_READ_BLOCK_LENGTH as usize)
            .await
            .with_context(|| format!("reading {} at {}", args.path, offset))?;
        if block.is_empty() {
            break;
        }
        offset += block.len() as u64;
        decoder.write(&block, &mut text);
        stdout.write_all(text.as_bytes())?;
        text.clear();
    }
    decoder.finish(&mut text);
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;

    client.close(&handle).await?;
    client.shutdown().await;
    Ok(())
}
