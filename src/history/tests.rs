use super::*;
use crate::config::RetryConfig;
use crate::types::Account;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT: &str = "79001234567@c.us";

fn history_item(ts: i64, text: &str) -> Value {
    json!({
        "type": "incoming",
        "typeMessage": "textMessage",
        "chatId": CHAT,
        "idMessage": format!("id-{}", ts),
        "timestamp": ts,
        "textMessage": text
    })
}

fn pager_for(server: &MockServer) -> Arc<HistoryPager> {
    let account = Account::new(
        "1101000001",
        "d75b3a66374942c5b3c019c698abc2067e151558acbd412b",
    );
    let api = Arc::new(ApiClient::new(
        account,
        server.uri(),
        RetryConfig {
            max_attempts: 1,
            initial_delay_ms: 1,
            ..RetryConfig::default()
        },
    ));
    Arc::new(HistoryPager::new(api, 3))
}

async fn mount_history(server: &MockServer, count: u32, items: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path_regex(r"/getChatHistory/"))
        .and(body_partial_json(json!({"count": count})))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_initial_full_page_signals_has_more() {
    let server = MockServer::start().await;
    // Server returns newest first.
    mount_history(
        &server,
        3,
        vec![
            history_item(500, "c"),
            history_item(400, "b"),
            history_item(300, "a"),
        ],
    )
    .await;

    let pager = pager_for(&server);
    let page = pager.load_initial(CHAT).await.unwrap().unwrap();
    let ts: Vec<i64> = page.messages.iter().map(|m| m.timestamp).collect();
    assert_eq!(ts, vec![300, 400, 500], "pages come back ascending");
    assert!(page.has_more, "full page implies more history");

    let cursor = pager.cursor(CHAT);
    assert_eq!(cursor.oldest_ts, Some(300));
    assert_eq!(cursor.loaded, 3);
    assert!(!cursor.busy);
}

#[tokio::test]
async fn test_initial_partial_page_ends_pagination() {
    let server = MockServer::start().await;
    mount_history(
        &server,
        3,
        vec![history_item(200, "b"), history_item(100, "a")],
    )
    .await;

    let pager = pager_for(&server);
    let page = pager.load_initial(CHAT).await.unwrap().unwrap();
    assert_eq!(page.messages.len(), 2);
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_initial_empty_response() {
    let server = MockServer::start().await;
    mount_history(&server, 3, vec![]).await;

    let pager = pager_for(&server);
    let page = pager.load_initial(CHAT).await.unwrap().unwrap();
    assert!(page.messages.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_malformed_history_degrades_to_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/getChatHistory/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<!doctype html>"))
        .mount(&server)
        .await;

    let pager = pager_for(&server);
    let page = pager.load_initial(CHAT).await.unwrap().unwrap();
    assert!(page.messages.is_empty());
    assert!(!page.has_more, "malformed response must not retry forever");
}

#[tokio::test]
async fn test_load_more_filters_overlapping_window() {
    let server = MockServer::start().await;
    mount_history(
        &server,
        3,
        vec![
            history_item(500, "e"),
            history_item(400, "d"),
            history_item(300, "c"),
        ],
    )
    .await;
    // The grown window overlaps the already-loaded messages.
    mount_history(
        &server,
        6,
        vec![
            history_item(500, "e"),
            history_item(400, "d"),
            history_item(300, "c"),
            history_item(200, "b"),
            history_item(100, "a"),
        ],
    )
    .await;

    let pager = pager_for(&server);
    pager.load_initial(CHAT).await.unwrap().unwrap();
    let page = pager.load_more(CHAT, 300).await.unwrap().unwrap();
    let ts: Vec<i64> = page.messages.iter().map(|m| m.timestamp).collect();
    assert_eq!(ts, vec![100, 200], "only strictly-older messages survive");
    assert!(!page.has_more, "short raw window means history is exhausted");

    let cursor = pager.cursor(CHAT);
    assert_eq!(cursor.oldest_ts, Some(100));
    assert_eq!(cursor.loaded, 5);
}

#[tokio::test]
async fn test_load_more_full_window_keeps_paging() {
    let server = MockServer::start().await;
    mount_history(
        &server,
        3,
        vec![
            history_item(600, "f"),
            history_item(500, "e"),
            history_item(400, "d"),
        ],
    )
    .await;
    mount_history(
        &server,
        6,
        vec![
            history_item(600, "f"),
            history_item(500, "e"),
            history_item(400, "d"),
            history_item(300, "c"),
            history_item(200, "b"),
            history_item(100, "a"),
        ],
    )
    .await;

    let pager = pager_for(&server);
    pager.load_initial(CHAT).await.unwrap().unwrap();
    let page = pager.load_more(CHAT, 400).await.unwrap().unwrap();
    assert_eq!(page.messages.len(), 3);
    assert!(page.has_more);
}

#[tokio::test]
async fn test_back_to_back_load_more_is_single_flight() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/getChatHistory/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let pager = pager_for(&server);
    let first = {
        let pager = pager.clone();
        tokio::spawn(async move { pager.load_more(CHAT, 1000).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = pager.load_more(CHAT, 1000).await.unwrap();
    assert!(second.is_none(), "overlapping call must be rejected");

    let first = first.await.unwrap().unwrap();
    assert!(first.is_some(), "first call proceeds normally");
}

#[tokio::test]
async fn test_pagination_monotonicity_across_pages() {
    let server = MockServer::start().await;
    mount_history(
        &server,
        3,
        vec![
            history_item(900, "i"),
            history_item(800, "h"),
            history_item(700, "g"),
        ],
    )
    .await;
    mount_history(
        &server,
        6,
        vec![
            history_item(900, "i"),
            history_item(800, "h"),
            history_item(700, "g"),
            history_item(600, "f"),
            history_item(500, "e"),
            history_item(400, "d"),
        ],
    )
    .await;
    mount_history(
        &server,
        9,
        vec![
            history_item(900, "i"),
            history_item(800, "h"),
            history_item(700, "g"),
            history_item(600, "f"),
            history_item(500, "e"),
            history_item(400, "d"),
            history_item(300, "c"),
        ],
    )
    .await;

    let pager = pager_for(&server);
    let mut all = pager.load_initial(CHAT).await.unwrap().unwrap().messages;
    let mut oldest = pager.cursor(CHAT).oldest_ts.unwrap();

    for _ in 0..2 {
        let page = pager.load_more(CHAT, oldest).await.unwrap().unwrap();
        all = crate::cache::merge_messages(&all, &page.messages);
        let next_oldest = pager.cursor(CHAT).oldest_ts.unwrap();
        assert!(next_oldest <= oldest, "oldest-loaded is non-increasing");
        oldest = next_oldest;
    }

    let ts: Vec<i64> = all.iter().map(|m| m.timestamp).collect();
    let mut sorted = ts.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(ts, sorted, "full sequence stays ascending with no duplicates");
    assert_eq!(ts.first().copied(), Some(300));
}

#[tokio::test]
async fn test_error_clears_busy_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/getChatHistory/"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_history(&server, 3, vec![history_item(100, "a")]).await;

    let pager = pager_for(&server);
    assert!(pager.load_initial(CHAT).await.is_err());
    assert!(!pager.cursor(CHAT).busy, "failed fetch releases the flight");
    // The pager is usable again immediately.
    let page = pager.load_initial(CHAT).await.unwrap().unwrap();
    assert_eq!(page.messages.len(), 1);
}
