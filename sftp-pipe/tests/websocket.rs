//! End-to-end tests over a real WebSocket listener on localhost.

mod common;

use std::fs;

use common::start_websocket_server;
use sftp_pipe::server::SessionOptions;
use sftp_pipe::transport::websocket;
use sftp_pipe::{AdapterConfig, ClientOptions, OpenFlags, RemoteFs, SftpClient, WebSocketConnector};

#[tokio::test]
async fn test_client_over_websocket() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "hello over ws").unwrap();
    let url = start_websocket_server(dir.path(), SessionOptions::default()).await;

    let channel = websocket::connect(&url).await.unwrap();
    let client = SftpClient::connect(channel, ClientOptions::default())
        .await
        .unwrap();

    let items = client.read_dir("/").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].filename, "a.txt");
    assert!(items[0].longname.contains("a.txt"));

    let handle = client.open("/a.txt", OpenFlags::READ, None).await.unwrap();
    assert_eq!(client.read(&handle, 0, 64).await.unwrap(), b"hello over ws");
    client.close(&handle).await.unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("f"), "x").unwrap();
    let url = start_websocket_server(dir.path(), SessionOptions::default()).await;

    let first = SftpClient::connect(websocket::connect(&url).await.unwrap(), ClientOptions::default())
        .await
        .unwrap();
    let second = SftpClient::connect(websocket::connect(&url).await.unwrap(), ClientOptions::default())
        .await
        .unwrap();

    first.open("/f", OpenFlags::READ, None).await.unwrap();
    first.shutdown().await;

    // The other session keeps working after its neighbour goes away.
    assert!(second.stat("/f").await.unwrap().is_file());
}

#[tokio::test]
async fn test_adapter_over_websocket() {
    let dir = tempfile::tempdir().unwrap();
    let url = start_websocket_server(dir.path(), SessionOptions::default()).await;

    let remote = RemoteFs::new(WebSocketConnector::new(url), AdapterConfig::default());
    remote.connect().await.unwrap();

    let fd = remote.create("/note", 0o644).await.unwrap();
    remote.write("/note", fd, b"remote write", 0).await.unwrap();
    remote.release("/note", fd).await.unwrap();
    assert_eq!(fs::read(dir.path().join("note")).unwrap(), b"remote write");
    assert_eq!(remote.readdir("/").await.unwrap(), vec!["note"]);
    remote.shutdown().await;
}

