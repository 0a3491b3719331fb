//! HTTP server integration tests
//!
//! Start the hyper server on an OS-assigned port and talk to it with reqwest
//! (and, for the interrupted-transfer case, a raw TCP socket).

use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tus_uploadr::config::ConfigLoader;
use tus_uploadr::extension::ChecksumAlgorithm;
use tus_uploadr::server::Server;

const OCTET: &str = "application/offset+octet-stream";

struct TestServer {
    _dir: TempDir,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigLoader::from_yaml(&format!(
        r#"
server:
  address: "127.0.0.1:0"
  base_path: /files/
  max_size: 1048576
storage:
  directory: {}
"#,
        dir.path().display()
    ))
    .unwrap();

    let server = Server::new(config).await.expect("Failed to create server");
    let addr = server.local_addr();
    let shutdown = server.shutdown_token();
    tokio::spawn(server.run());

    TestServer {
        _dir: dir,
        addr,
        shutdown,
    }
}

async fn create(client: &reqwest::Client, server: &TestServer, final_length: u64) -> String {
    let response = client
        .post(server.url("/files/"))
        .header("Final-Length", final_length)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    response
        .headers()
        .get("Location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn remote_offset(client: &reqwest::Client, location: &str) -> u64 {
    let response = client.head(location).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    response
        .headers()
        .get("Offset")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let response = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    // Generate at least one request sample
    client
        .request(reqwest::Method::OPTIONS, server.url("/files/"))
        .send()
        .await
        .unwrap();

    let response = client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.text().await.unwrap().contains("tus_requests_total"));

    let response = client.get(server.url("/nowhere")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_upload_over_http() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let data: Vec<u8> = (0..180u32).map(|i| (i % 251) as u8).collect();

    let location = create(&client, &server, 180).await;
    assert!(location.starts_with(&server.url("/files/")));

    for (offset, chunk) in [(0u64, &data[..90]), (90, &data[90..])] {
        let response = client
            .patch(&location)
            .header("Offset", offset)
            .header("Content-Type", OCTET)
            .body(chunk.to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers().get("Tus-Resumable").unwrap(), "1.0.0");
    }
    assert_eq!(remote_offset(&client, &location).await, 180);

    let response = client.get(&location).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers().get("Content-Type").unwrap(),
        "application/force-download"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), &data[..]);
}

#[tokio::test]
async fn test_options_over_http() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .request(reqwest::Method::OPTIONS, server.url("/files/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);
    let headers = response.headers();
    assert_eq!(headers.get("Tus-Version").unwrap(), "1.0.0");
    assert_eq!(headers.get("Tus-Extension").unwrap(), "checksum");
    assert_eq!(headers.get("Tus-Max-Size").unwrap(), "1048576");
    assert!(headers.get("Tus-Checksum-Algorithm").is_some());
}

#[tokio::test]
async fn test_checksum_mismatch_status_over_http() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let location = create(&client, &server, 4).await;

    let response = client
        .patch(&location)
        .header("Offset", 0)
        .header("Content-Type", OCTET)
        .header(
            "Upload-Checksum",
            format!("sha1 {}", ChecksumAlgorithm::Sha1.encoded_digest(b"else")),
        )
        .body("test")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 460);
}

#[tokio::test]
async fn test_interrupted_transfer_can_resume() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let location = create(&client, &server, 100).await;
    let path = location.trim_start_matches(&server.url(""));

    // Declare 100 bytes, send 40, then close the write side
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let head = format!(
        "PATCH {} HTTP/1.1\r\nHost: {}\r\nOffset: 0\r\nContent-Type: {}\r\nContent-Length: 100\r\n\r\n",
        path, server.addr, OCTET
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&[7u8; 40]).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut discard = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut discard)).await;

    let offset = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let offset = remote_offset(&client, &location).await;
            if offset == 40 {
                return offset;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(offset, 40);

    let response = client
        .patch(&location)
        .header("Offset", 40)
        .header("Content-Type", OCTET)
        .body(vec![7u8; 60])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(remote_offset(&client, &location).await, 100);
}
