use crate::api::{parse_item, parse_ranked_ids, HackerNewsClient, HackerNewsItemData};
use beststories_core::{AppConfig, CoreError, HackerNewsApiError, ItemId, StorySource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

fn create_test_config(base_url: &str) -> AppConfig {
    AppConfig {
        base_url: base_url.to_string(),
        ..Default::default()
    }
    .validate()
    .unwrap()
}

/// Serves canned responses keyed by request path, one request per connection.
async fn spawn_stub_server(routes: Vec<(&'static str, u16, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let Some(request) = read_request_head(&mut socket).await else {
                    return;
                };
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, body) = routes
                    .iter()
                    .find(|(route, _, _)| *route == path)
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((404, "not found"));
                let response = format!(
                    "HTTP/1.1 {} STUB\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/v0/", addr)
}

async fn read_request_head(socket: &mut TcpStream) -> Option<String> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    Some(String::from_utf8_lossy(&request).into_owned())
}

/// Answers every path with `body`, pausing halfway through the body. Returns
/// the base URL and the peak number of requests being served at once. A
/// request stops counting just before its last bytes go out.
async fn spawn_slow_stub_server(body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let observed = peak.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let active = active.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                if read_request_head(&mut socket).await.is_none() {
                    return;
                }
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                let (head, tail) = body.split_at(body.len() / 2);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    head
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(50)).await;

                active.fetch_sub(1, Ordering::SeqCst);
                let _ = socket.write_all(tail.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}/v0/", addr), observed)
}

#[test]
fn test_endpoint_urls_keep_base_path() {
    let client = HackerNewsClient::new(&create_test_config("https://example.com/v0")).unwrap();

    assert_eq!(
        client.endpoint_url("beststories.json").unwrap().as_str(),
        "https://example.com/v0/beststories.json"
    );
    assert_eq!(
        client
            .endpoint_url(&HackerNewsClient::item_endpoint(ItemId(8863)))
            .unwrap()
            .as_str(),
        "https://example.com/v0/item/8863.json"
    );
}

#[test]
fn test_parse_full_item() {
    let body = r#"{
        "by": "dhouston",
        "descendants": 71,
        "id": 8863,
        "kids": [8952, 9224],
        "score": 111,
        "time": 1175714200,
        "title": "My YC app: Dropbox - Throw away your USB drive",
        "type": "story",
        "url": "http://www.getdropbox.com/u/2/screencast.html"
    }"#;

    let item = parse_item(ItemId(8863), body).unwrap().unwrap();
    assert_eq!(item.id, ItemId(8863));
    assert_eq!(item.by, "dhouston");
    assert_eq!(item.score, 111);
    assert_eq!(item.descendants, 71);
    assert_eq!(item.time, 1175714200);
    assert_eq!(
        item.title.as_deref(),
        Some("My YC app: Dropbox - Throw away your USB drive")
    );
    assert_eq!(
        item.url.as_deref(),
        Some("http://www.getdropbox.com/u/2/screencast.html")
    );
}

#[test]
fn test_parse_null_item_is_absent() {
    assert_eq!(parse_item(ItemId(1), "null").unwrap(), None);
}

#[test]
fn test_parse_removed_items_are_absent() {
    let deleted = r#"{"id": 2, "deleted": true, "time": 1600000000}"#;
    assert_eq!(parse_item(ItemId(2), deleted).unwrap(), None);

    let dead = r#"{"id": 3, "dead": true, "by": "spam", "score": 1}"#;
    assert_eq!(parse_item(ItemId(3), dead).unwrap(), None);
}

#[test]
fn test_parse_sparse_item_fills_defaults() {
    let body = r#"{"id": 4, "by": "pg", "score": 5, "type": "story"}"#;
    let item = parse_item(ItemId(4), body).unwrap().unwrap();
    assert_eq!(item.title, None);
    assert_eq!(item.url, None);
    assert_eq!(item.time, 0);
    assert_eq!(item.descendants, 0);
}

#[test]
fn test_parse_item_without_id_uses_requested_id() {
    let item = parse_item(ItemId(77), r#"{"score": 3}"#).unwrap().unwrap();
    assert_eq!(item.id, ItemId(77));
}

#[test]
fn test_parse_invalid_item_is_error() {
    let result = parse_item(ItemId(5), "<html>oops</html>");
    assert!(matches!(
        result,
        Err(CoreError::HackerNewsApi(HackerNewsApiError::InvalidResponse { .. }))
    ));
}

#[test]
fn test_parse_ranked_ids() {
    let ids = parse_ranked_ids("[3, 1, 2, 1]").unwrap();
    assert_eq!(ids, vec![ItemId(3), ItemId(1), ItemId(2), ItemId(1)]);

    assert!(parse_ranked_ids("null").unwrap().is_empty());
    assert!(parse_ranked_ids("[]").unwrap().is_empty());
    assert!(parse_ranked_ids("{\"ids\": []}").is_err());
}

#[test]
fn test_item_data_conversion() {
    let data = HackerNewsItemData {
        id: 10,
        title: Some("Show HN".to_string()),
        by: Some("alice".to_string()),
        score: Some(42),
        ..Default::default()
    };
    let item = data.into_item().unwrap();
    assert_eq!(item.id, ItemId(10));
    assert_eq!(item.by, "alice");

    let removed = HackerNewsItemData {
        id: 11,
        deleted: true,
        ..Default::default()
    };
    assert!(removed.into_item().is_none());
}

#[tokio::test]
async fn test_fetch_against_stub_server() {
    let base_url = spawn_stub_server(vec![
        ("/v0/beststories.json", 200, "[10, 20, 30]"),
        (
            "/v0/item/10.json",
            200,
            r#"{"id": 10, "by": "a", "score": 50, "time": 1609459200, "title": "ten"}"#,
        ),
        ("/v0/item/20.json", 200, "null"),
        ("/v0/item/40.json", 500, "boom"),
    ])
    .await;
    let client = HackerNewsClient::new(&create_test_config(&base_url)).unwrap();

    let ids = client.fetch_ranked_ids().await.unwrap();
    assert_eq!(ids, vec![ItemId(10), ItemId(20), ItemId(30)]);

    let ten = client.fetch_item(ItemId(10)).await.unwrap().unwrap();
    assert_eq!(ten.title.as_deref(), Some("ten"));
    assert_eq!(ten.score, 50);

    // null body and 404 are both a clean "absent"
    assert_eq!(client.fetch_item(ItemId(20)).await.unwrap(), None);
    assert_eq!(client.fetch_item(ItemId(30)).await.unwrap(), None);

    let failed = client.fetch_item(ItemId(40)).await;
    assert!(matches!(
        failed,
        Err(CoreError::HackerNewsApi(HackerNewsApiError::ServerError { status_code: 500 }))
    ));

    let metrics = client.get_metrics().await;
    assert_eq!(metrics.total_requests, 5);
    assert_eq!(metrics.not_found_requests, 1);
    assert_eq!(metrics.failed_requests, 1);
    assert_eq!(
        metrics.requests_by_endpoint.get("item").unwrap().request_count,
        4
    );
}

#[tokio::test]
async fn test_ranked_ids_server_error_is_reported() {
    let base_url = spawn_stub_server(vec![("/v0/beststories.json", 503, "down")]).await;
    let client = HackerNewsClient::new(&create_test_config(&base_url)).unwrap();

    let result = client.fetch_ranked_ids().await;
    assert!(matches!(
        result,
        Err(CoreError::HackerNewsApi(HackerNewsApiError::ServerError { status_code: 503 }))
    ));
}

#[tokio::test]
async fn test_ranked_ids_not_found_is_an_error() {
    let base_url = spawn_stub_server(vec![]).await;
    let client = HackerNewsClient::new(&create_test_config(&base_url)).unwrap();

    let result = client.fetch_ranked_ids().await;
    assert!(matches!(
        result,
        Err(CoreError::HackerNewsApi(HackerNewsApiError::UnexpectedStatus {
            status_code: 404,
            ..
        }))
    ));
}

#[tokio::test]
async fn test_concurrency_cap_bounds_requests_until_body_read() {
    let (base_url, peak) = spawn_slow_stub_server(r#"{"id": 1, "score": 1}"#).await;
    let config = AppConfig {
        max_concurrent_requests: 1,
        ..create_test_config(&base_url)
    };
    let client = Arc::new(HackerNewsClient::new(&config).unwrap());

    let mut tasks = JoinSet::new();
    for id in 1..=4 {
        let client = client.clone();
        tasks.spawn(async move { client.fetch_item(ItemId(id)).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().unwrap().is_some());
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unbounded_client_overlaps_requests() {
    let (base_url, peak) = spawn_slow_stub_server(r#"{"id": 1, "score": 1}"#).await;
    let client = Arc::new(HackerNewsClient::new(&create_test_config(&base_url)).unwrap());

    let mut tasks = JoinSet::new();
    for id in 1..=4 {
        let client = client.clone();
        tasks.spawn(async move { client.fetch_item(ItemId(id)).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().unwrap().is_some());
    }

    assert!(peak.load(Ordering::SeqCst) > 1);
}
