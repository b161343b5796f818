// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Fetcher behavior against a loopback HTTP server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use attest_collateral::{fetch_all, fetch_all_with_deadline, Request, RequestTracker};
use attest_types::VerificationError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

type Routes = Arc<Mutex<HashMap<String, Vec<String>>>>;

/// Serve canned responses per path; each path pops its queue front on every
/// hit and repeats the last entry once drained.
async fn spawn_server(routes: Routes) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                loop {
                    let n = stream.read(&mut buf[read..]).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]).to_string();
                let path = request
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                let response = {
                    let mut routes = routes.lock().unwrap();
                    match routes.get_mut(&path) {
                        Some(queue) if queue.len() > 1 => queue.remove(0),
                        Some(queue) => queue[0].clone(),
                        None => "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string(),
                    }
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

fn ok_response(body: &str, extra_headers: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n{extra_headers}\r\n{body}",
        body.len()
    )
}

fn too_many_requests(retry_after: u64) -> String {
    format!(
        "HTTP/1.1 429 Too Many Requests\r\nretry-after: {retry_after}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
    )
}

fn routes(entries: &[(&str, Vec<String>)]) -> Routes {
    Arc::new(Mutex::new(
        entries
            .iter()
            .map(|(path, queue)| (path.to_string(), queue.clone()))
            .collect(),
    ))
}

#[tokio::test]
async fn batch_returns_responses_in_request_order() {
    let base = spawn_server(routes(&[
        ("/a", vec![ok_response("alpha", "")]),
        ("/b", vec![ok_response("beta", "x-chain: a%20b\r\n")]),
    ]))
    .await;

    let responses = fetch_all(
        &reqwest::Client::new(),
        vec![
            Request::new(format!("{base}/a")),
            Request::new(format!("{base}/b")),
        ],
    )
    .await
    .unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].body, b"alpha");
    assert_eq!(responses[1].body, b"beta");
    assert_eq!(responses[1].header_data("X-Chain", true).unwrap(), b"a b");
}

#[tokio::test]
async fn retries_429_until_success() {
    let base = spawn_server(routes(&[(
        "/collateral",
        vec![too_many_requests(1), ok_response("done", "")],
    )]))
    .await;

    let start = std::time::Instant::now();
    let responses = fetch_all(
        &reqwest::Client::new(),
        vec![Request::new(format!("{base}/collateral"))],
    )
    .await
    .unwrap();
    assert_eq!(responses[0].body, b"done");
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn exhausted_retries_surface_429() {
    let base = spawn_server(routes(&[("/limited", vec![too_many_requests(1)])])).await;

    let err = fetch_all(
        &reqwest::Client::new(),
        vec![Request::new(format!("{base}/limited")).with_max_attempts(2)],
    )
    .await
    .unwrap_err();
    match err {
        VerificationError::CollateralFetchFailed { url, status } => {
            assert_eq!(status, 429);
            assert!(url.ends_with("/limited"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_2xx_fails_whole_batch() {
    let base = spawn_server(routes(&[("/present", vec![ok_response("ok", "")])])).await;

    let err = fetch_all(
        &reqwest::Client::new(),
        vec![
            Request::new(format!("{base}/present")),
            Request::new(format!("{base}/absent")),
        ],
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        VerificationError::CollateralFetchFailed { status: 404, .. }
    ));
}

#[tokio::test]
async fn deadline_cuts_off_retry_sleep() {
    let base = spawn_server(routes(&[("/slow", vec![too_many_requests(30)])])).await;

    let start = std::time::Instant::now();
    let err = fetch_all_with_deadline(
        &reqwest::Client::new(),
        vec![Request::new(format!("{base}/slow"))],
        Duration::from_millis(250),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, VerificationError::Timeout));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn tracker_runs_callback_and_erases() {
    let base = spawn_server(routes(&[("/a", vec![ok_response("alpha", "")])])).await;

    let tracker = RequestTracker::new();
    let (tx, rx) = tokio::sync::oneshot::channel();
    let id = tracker.submit(vec![Request::new(format!("{base}/a"))], move |result| {
        let _ = tx.send(result.map(|rs| rs[0].body.clone()));
    });

    let body = rx.await.unwrap().unwrap();
    assert_eq!(body, b"alpha");
    // Give the done flag a beat to settle, then the set reads complete.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(tracker.is_complete(id));
    tracker.erase(id);
    assert!(tracker.is_complete(id));
}
