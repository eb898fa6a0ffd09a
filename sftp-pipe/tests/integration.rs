//! Integration tests for client operations through an in-process session.
//!
//! Each test serves a fresh temp directory over an in-memory channel and
//! drives it with `SftpClient`.

mod common;

use std::fs;
use std::sync::Arc;

use common::MemoryFixture;
use sftp_pipe::protocol::{extension, MAX_READ_BLOCK_LENGTH};
use sftp_pipe::server::{ServerConfig, SessionOptions};
use sftp_pipe::{FileAttrs, OpenFlags, SftpError};

#[tokio::test]
async fn test_handshake_advertises_extensions() {
    let fx = MemoryFixture::new().await;
    for name in extension::ADVERTISED {
        assert!(fx.client.supports(name), "missing {}", name);
    }
    assert!(fx
        .client
        .extensions()
        .iter()
        .all(|(_, value)| value == "1"));
}

#[tokio::test]
async fn test_stat_file_and_missing() {
    let fx = MemoryFixture::new().await;
    fs::write(fx.path("a.txt"), "hello").unwrap();

    let attrs = fx.client.stat("/a.txt").await.unwrap();
    assert_eq!(attrs.size, Some(5));
    assert!(attrs.is_file());

    let err = fx.client.stat("/missing").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert_eq!(err.code(), "ENOENT");
}

#[tokio::test]
async fn test_create_write_read_chunked() {
    let fx = MemoryFixture::new().await;
    let len = 3 * MAX_READ_BLOCK_LENGTH as usize + 123;
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

    let handle = fx
        .client
        .open(
            "/big.bin",
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC,
            None,
        )
        .await
        .unwrap();
    fx.client.write(&handle, 0, &data).await.unwrap();
    fx.client.close(&handle).await.unwrap();
    assert_eq!(fs::read(fx.path("big.bin")).unwrap(), data);

    let handle = fx
        .client
        .open("/big.bin", OpenFlags::READ, None)
        .await
        .unwrap();
    let read = fx.client.read(&handle, 0, len + 1000).await.unwrap();
    assert_eq!(read, data);

    let tail = fx.client.read(&handle, len as u64 - 10, 100).await.unwrap();
    assert_eq!(tail, &data[len - 10..]);

    let past_end = fx.client.read(&handle, len as u64 + 5, 10).await.unwrap();
    assert!(past_end.is_empty());
    fx.client.close(&handle).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_share_one_channel() {
    let fx = MemoryFixture::new().await;
    for i in 0..16 {
        fs::write(fx.path(&format!("f{}", i)), vec![b'x'; i]).unwrap();
    }
    let client = Arc::new(fx.client);

    let mut tasks = Vec::new();
    for i in 0..16usize {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let attrs = client.lstat(&format!("/f{}", i)).await.unwrap();
            assert_eq!(attrs.size, Some(i as u64));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_read_dir_paginates() {
    let config = ServerConfig::default().readdir_budget(256);
    let fx = MemoryFixture::with_config(config, SessionOptions::default()).await;
    for i in 0..50 {
        fs::write(fx.path(&format!("entry-{:02}", i)), "x").unwrap();
    }

    let handle = fx.client.opendir("/").await.unwrap();
    let mut batches = 0;
    let mut names = Vec::new();
    while let Some(batch) = fx.client.readdir(&handle).await.unwrap() {
        assert!(!batch.is_empty());
        batches += 1;
        names.extend(batch.into_iter().map(|item| item.filename));
    }
    fx.client.close(&handle).await.unwrap();

    assert!(batches > 1);
    names.sort();
    let expected: Vec<String> = (0..50).map(|i| format!("entry-{:02}", i)).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_directory_lifecycle() {
    let fx = MemoryFixture::new().await;

    fx.client.mkdir("/d", None).await.unwrap();
    assert!(fx.path("d").is_dir());
    let err = fx.client.mkdir("/d", None).await.unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);

    fs::write(fx.path("d/inner"), "x").unwrap();
    let err = fx.client.rmdir("/d").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTEMPTY);

    fx.client.unlink("/d/inner").await.unwrap();
    fx.client.rmdir("/d").await.unwrap();
    assert!(!fx.path("d").exists());
}

#[tokio::test]
async fn test_rename_semantics() {
    let fx = MemoryFixture::new().await;
    fs::write(fx.path("a"), "a").unwrap();
    fs::write(fx.path("b"), "b").unwrap();

    let err = fx.client.rename("/a", "/b", false).await.unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);

    fx.client.rename("/a", "/b", true).await.unwrap();
    assert_eq!(fs::read_to_string(fx.path("b")).unwrap(), "a");
    assert!(!fx.path("a").exists());

    fx.client.rename("/b", "/c", false).await.unwrap();
    assert!(fx.path("c").exists());
}

#[tokio::test]
async fn test_links() {
    let fx = MemoryFixture::new().await;
    fs::write(fx.path("target"), "t").unwrap();

    fx.client.symlink("/target", "/sym").await.unwrap();
    assert_eq!(fx.client.readlink("/sym").await.unwrap(), "/target");
    assert!(fx.client.lstat("/sym").await.unwrap().is_symlink());
    assert!(fx.client.stat("/sym").await.unwrap().is_file());

    fx.client.link("/target", "/hard").await.unwrap();
    assert_eq!(fs::read_to_string(fx.path("hard")).unwrap(), "t");
}

#[tokio::test]
async fn test_setstat_size_and_times() {
    let fx = MemoryFixture::new().await;
    fs::write(fx.path("f"), "0123456789").unwrap();

    fx.client
        .setstat("/f", FileAttrs::new().with_size(4).with_times(1000, 2000))
        .await
        .unwrap();
    let attrs = fx.client.stat("/f").await.unwrap();
    assert_eq!(attrs.size, Some(4));
    assert_eq!(attrs.times, Some((1000, 2000)));
}

#[tokio::test]
async fn test_exclusive_create() {
    let fx = MemoryFixture::new().await;
    let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCL;

    let handle = fx.client.open("/new", flags, None).await.unwrap();
    fx.client.close(&handle).await.unwrap();

    let err = fx.client.open("/new", flags, None).await.unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);
}

#[tokio::test]
async fn test_closed_handle_is_rejected_locally() {
    let fx = MemoryFixture::new().await;
    fs::write(fx.path("f"), "x").unwrap();

    let handle = fx.client.open("/f", OpenFlags::READ, None).await.unwrap();
    fx.client.close(&handle).await.unwrap();
    assert_eq!(
        fx.client.read(&handle, 0, 1).await.unwrap_err(),
        SftpError::InvalidHandle
    );
    assert_eq!(
        fx.client.close(&handle).await.unwrap_err(),
        SftpError::InvalidHandle
    );
}

#[tokio::test]
async fn test_copy_and_hash_extensions() {
    let fx = MemoryFixture::new().await;
    let data = vec![7u8; 100_000];
    fs::write(fx.path("src"), &data).unwrap();

    let from = fx.client.open("/src", OpenFlags::READ, None).await.unwrap();
    let to = fx
        .client
        .open("/dst", OpenFlags::WRITE | OpenFlags::CREATE, None)
        .await
        .unwrap();
    fx.client.fcopy(&from, 0, 0, &to, 0).await.unwrap();
    fx.client.close(&to).await.unwrap();
    assert_eq!(fs::read(fx.path("dst")).unwrap(), data);

    let (algorithm, hashes) = fx
        .client
        .fhash(&from, "md5,sha256", 0, 0, 0)
        .await
        .unwrap();
    assert_eq!(algorithm, "sha256");
    assert_eq!(hashes.len(), 32);

    let (_, blocks) = fx
        .client
        .fhash(&from, "sha256", 0, 0, 32 * 1024)
        .await
        .unwrap();
    assert_eq!(blocks.len(), 4 * 32);
    fx.client.close(&from).await.unwrap();
}

#[tokio::test]
async fn test_statvfs() {
    let fx = MemoryFixture::new().await;
    let stats = fx.client.statvfs("/").await.unwrap();
    assert!(stats.bsize > 0);
}

#[tokio::test]
async fn test_paths_are_confined() {
    let fx = MemoryFixture::new().await;
    fs::write(fx.path("inside"), "x").unwrap();

    assert_eq!(fx.client.realpath("../../..").await.unwrap(), "/");
    assert!(fx.client.stat("/../../inside").await.unwrap().is_file());
    assert_eq!(
        fx.client.stat("/../etc/passwd").await.unwrap_err().errno(),
        libc::ENOENT
    );
}

#[tokio::test]
async fn test_read_only_session() {
    let fx = MemoryFixture::with_config(
        ServerConfig::default(),
        SessionOptions::default().read_only(true),
    )
    .await;
    fs::write(fx.path("f"), "x").unwrap();

    assert_eq!(
        fx.client.unlink("/f").await.unwrap_err().errno(),
        libc::EROFS
    );
    assert_eq!(
        fx.client.mkdir("/d", None).await.unwrap_err().errno(),
        libc::EROFS
    );
    assert!(fx.client.stat("/f").await.is_ok());
}

#[tokio::test]
async fn test_shutdown_fails_pending_and_later_requests() {
    let fx = MemoryFixture::new().await;
    fx.client.shutdown().await;
    assert!(fx.client.is_closed());
    assert_eq!(
        fx.client.stat("/").await.unwrap_err(),
        SftpError::ConnectionClosed
    );

    let served = fx.server.await.unwrap();
    assert!(served.is_ok());
    assert_eq!(fx.fs.inner().open_count(), 0);
}
