//! End-to-end tests against a running server: negotiation, caching flows,
//! invalidation, and the file path/redirect split.

use httpmock::prelude::*;
use pyrelay::cache::Cache;
use pyrelay::file_cache::FileCache;
use pyrelay::index::IndexCache;
use pyrelay::server::{self, AppState};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const JSON_V1: &str = "application/vnd.pypi.simple.v1+json";

fn index_cache(upstream: &MockServer) -> IndexCache {
    IndexCache::new(
        Url::parse(&format!("{}/simple/", upstream.base_url())).unwrap(),
        Duration::from_secs(60),
        reqwest::Client::new(),
    )
}

async fn spawn_app(
    root: &MockServer,
    extras: Vec<&MockServer>,
    max_size: u64,
    binary_file_mime_type: bool,
) -> SocketAddr {
    let file_cache = FileCache::new(
        max_size,
        None,
        Duration::from_millis(900),
        reqwest::Client::new(),
    )
    .unwrap();
    let cache = Cache::new(
        index_cache(root),
        extras.into_iter().map(index_cache).collect(),
        file_cache,
    );
    let state = Arc::new(AppState {
        cache,
        binary_file_mime_type,
    });
    server::start_server(state, "127.0.0.1", 0).await.unwrap()
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Root upstream: `proxpi` (JSON form) and `numpy` (HTML form, one yanked
/// wheel), plus the file bytes.
fn mock_root(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/simple/");
        then.status(200)
            .header("Content-Type", JSON_V1)
            .json_body(serde_json::json!({
                "meta": {"api-version": "1.0"},
                "projects": [{"name": "proxpi"}, {"name": "numpy"}],
            }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/simple/proxpi/");
        then.status(200)
            .header("Content-Type", JSON_V1)
            .json_body(serde_json::json!({
                "meta": {"api-version": "1.0"},
                "name": "proxpi",
                "files": [
                    {
                        "filename": "proxpi-1.1.0-py3-none-any.whl",
                        "url": format!("{}/files/proxpi-1.1.0-py3-none-any.whl", server.base_url()),
                        "hashes": {"sha256": "aaaa"},
                    },
                    {
                        "filename": "proxpi-1.0.0-py3-none-any.whl",
                        "url": format!("{}/files/proxpi-1.0.0-py3-none-any.whl", server.base_url()),
                        "hashes": {},
                    },
                ],
            }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/simple/numpy/");
        then.status(200).header("Content-Type", "text/html").body(
            "<!DOCTYPE html><html><body>\
             <a href=\"/files/numpy-1.23.1-cp310-cp310-win_amd64.whl#sha256=cccc\" \
             data-yanked=\"\">numpy-1.23.1-cp310-cp310-win_amd64.whl</a>\
             <a href=\"/files/numpy-1.23.1.tar.gz#sha256=dddd\">numpy-1.23.1.tar.gz</a>\
             </body></html>",
        );
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/files/proxpi-1.1.0-py3-none-any.whl.metadata");
        then.status(200).body("Metadata-Version: 2.1\nName: proxpi\n");
    });
}

#[tokio::test]
async fn project_listing_negotiates_json_and_html() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let response = http()
        .get(format!("http://{addr}/index/"))
        .header("Accept", JSON_V1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["Content-Type"].to_str().unwrap(),
        JSON_V1
    );
    assert_eq!(response.headers()["Vary"].to_str().unwrap(), "Accept, Accept-Encoding");
    let body: serde_json::Value = response.json().await.unwrap();
    let names: Vec<&str> = body["projects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|project| project["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["numpy", "proxpi"]);

    let response = http()
        .get(format!("http://{addr}/index/"))
        .header("Accept", "*/*")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response.headers()["Content-Type"]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    let body = response.text().await.unwrap();
    assert!(body.contains("<a href=\"numpy/\">numpy</a>"));
    assert!(body.contains("<a href=\"proxpi/\">proxpi</a>"));
}

#[tokio::test]
async fn multi_index_union_is_served() {
    let root = MockServer::start();
    mock_root(&root);
    let extra = MockServer::start();
    extra.mock(|when, then| {
        when.method(GET).path("/simple/");
        then.status(200)
            .header("Content-Type", "text/html")
            .body("<html><body><a href=\"extra-only/\">extra-only</a></body></html>");
    });
    extra.mock(|when, then| {
        when.method(GET).path("/simple/extra-only/");
        then.status(200)
            .header("Content-Type", "text/html")
            .body(
                "<html><body><a href=\"/files/extra_only-0.1.tar.gz\">extra_only-0.1.tar.gz</a>\
                 </body></html>",
            );
    });
    let addr = spawn_app(&root, vec![&extra], 0, false).await;

    let body: serde_json::Value = http()
        .get(format!("http://{addr}/index/"))
        .header("Accept", JSON_V1)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = body["projects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|project| project["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["extra-only", "numpy", "proxpi"]);

    let body: serde_json::Value = http()
        .get(format!("http://{addr}/index/extra-only/"))
        .header("Accept", JSON_V1)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["filename"], "extra_only-0.1.tar.gz");
}

#[tokio::test]
async fn yanked_marker_propagates_to_json() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let body: serde_json::Value = http()
        .get(format!("http://{addr}/index/numpy/"))
        .header("Accept", JSON_V1)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    let yanked = &files[0];
    assert_eq!(yanked["filename"], "numpy-1.23.1-cp310-cp310-win_amd64.whl");
    assert_eq!(yanked["yanked"], serde_json::Value::Bool(true));
    // The download URL is the filename so installers come back through us.
    assert_eq!(yanked["url"], "numpy-1.23.1-cp310-cp310-win_amd64.whl");

    let clean = &files[1];
    assert!(clean.get("yanked").is_none());
}

#[tokio::test]
async fn metadata_request_redirects_upstream() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let response = http()
        .get(format!(
            "http://{addr}/index/proxpi/proxpi-1.1.0-py3-none-any.whl.metadata"
        ))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers()["Location"].to_str().unwrap(),
        format!(
            "{}/files/proxpi-1.1.0-py3-none-any.whl.metadata",
            upstream.base_url()
        )
    );
}

#[tokio::test]
async fn concurrent_file_requests_download_once() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let wheel = upstream.mock(|when, then| {
        when.method(GET).path("/files/proxpi-1.1.0-py3-none-any.whl");
        then.status(200)
            .body(b"proxpi-wheel-bytes".to_vec())
            .delay(Duration::from_millis(100));
    });
    let addr = spawn_app(&upstream, Vec::new(), 1 << 20, false).await;
    let url = format!("http://{addr}/index/proxpi/proxpi-1.1.0-py3-none-any.whl");

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let response = http().get(&url).send().await.unwrap();
            (response.status(), response.bytes().await.unwrap())
        }));
    }
    for task in tasks {
        let (status, body) = task.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body.as_ref(), b"proxpi-wheel-bytes");
    }
    wheel.assert_hits(1);

    // Still exactly one upstream download after another request.
    let response = http().get(&url).send().await.unwrap();
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"proxpi-wheel-bytes");
    wheel.assert_hits(1);
}

#[tokio::test]
async fn disabled_cache_redirects_file_requests() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let response = http()
        .get(format!(
            "http://{addr}/index/proxpi/proxpi-1.1.0-py3-none-any.whl"
        ))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers()["Location"].to_str().unwrap(),
        format!("{}/files/proxpi-1.1.0-py3-none-any.whl", upstream.base_url())
    );
}

#[tokio::test]
async fn binary_mime_flag_forces_octet_stream() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    upstream.mock(|when, then| {
        when.method(GET).path("/files/proxpi-1.1.0-py3-none-any.whl");
        then.status(200).body(b"proxpi-wheel-bytes".to_vec());
    });
    let addr = spawn_app(&upstream, Vec::new(), 1 << 20, true).await;

    let response = http()
        .get(format!(
            "http://{addr}/index/proxpi/proxpi-1.1.0-py3-none-any.whl"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["Content-Type"].to_str().unwrap(),
        "application/octet-stream"
    );
}

#[tokio::test]
async fn unknown_accept_header_is_not_acceptable() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let response = http()
        .get(format!("http://{addr}/index/"))
        .header("Accept", "application/vnd.pypi.simple.v42+xml")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 406);
}

#[tokio::test]
async fn format_argument_forces_json() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let response = http()
        .get(format!("http://{addr}/index/?format={JSON_V1}"))
        .header("Accept", "text/html")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["Content-Type"].to_str().unwrap(),
        JSON_V1
    );
}

#[tokio::test]
async fn gzip_response_encodes_and_round_trips() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let identity = http()
        .get(format!("http://{addr}/index/"))
        .header("Accept", JSON_V1)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let response = http()
        .get(format!("http://{addr}/index/"))
        .header("Accept", JSON_V1)
        .header("Accept-Encoding", "gzip")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()["Content-Encoding"].to_str().unwrap(),
        "gzip"
    );
    let compressed = response.bytes().await.unwrap();
    let mut decoder = flate2::read::GzDecoder::new(compressed.as_ref());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    assert_eq!(decompressed, identity.as_ref());
}

#[tokio::test]
async fn unknown_project_is_404() {
    let upstream = MockServer::start();
    mock_root(&upstream);
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;

    let response = http()
        .get(format!("http://{addr}/index/ghost/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn health_and_invalidation_endpoints() {
    let upstream = MockServer::start();
    let listing = upstream.mock(|when, then| {
        when.method(GET).path("/simple/");
        then.status(200)
            .header("Content-Type", JSON_V1)
            .json_body(serde_json::json!({
                "meta": {"api-version": "1.0"},
                "projects": [{"name": "proxpi"}],
            }));
    });
    let addr = spawn_app(&upstream, Vec::new(), 0, false).await;
    let expected = serde_json::json!({"status": "success", "data": null});

    let body: serde_json::Value = http()
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, expected);

    // Prime the listing cache, invalidate it, and watch the refetch.
    http()
        .get(format!("http://{addr}/index/"))
        .send()
        .await
        .unwrap();
    http()
        .get(format!("http://{addr}/index/"))
        .send()
        .await
        .unwrap();
    listing.assert_hits(1);

    let body: serde_json::Value = http()
        .delete(format!("http://{addr}/cache/list"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, expected);

    http()
        .get(format!("http://{addr}/index/"))
        .send()
        .await
        .unwrap();
    listing.assert_hits(2);

    let body: serde_json::Value = http()
        .delete(format!("http://{addr}/cache/proxpi"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, expected);
}
