mod common;

use chrono::{TimeZone, Utc};
use futures_util::TryStreamExt;
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::remote;
use feedsync_core::{
    Backend, BackendError, CursorKind, Entry, IncrementalCursor, MinifluxBackend,
    NextcloudBackend, StandaloneBackend, Store,
};

fn sample_rss() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First</description>
    </item>
    <item>
      <title>Item 2</title>
      <link>http://example.com/2</link>
      <guid>2</guid>
      <pubDate>Mon, 21 Oct 2024 08:00:00 GMT</pubDate>
      <description>Second</description>
    </item>
  </channel>
</rss>"#
        .to_string()
}

fn miniflux_entry(id: i64, status: &str, starred: bool) -> serde_json::Value {
    json!({
        "id": id,
        "feed_id": 1,
        "status": status,
        "title": format!("Entry {id}"),
        "url": format!("http://example.com/{id}"),
        "published_at": "2024-10-21T07:28:00Z",
        "changed_at": "2024-10-21T07:28:00+02:00",
        "author": "",
        "content": "<p>body</p>",
        "starred": starred,
        "enclosures": null
    })
}

fn nextcloud_item(id: i64, unread: bool, starred: bool) -> serde_json::Value {
    json!({
        "id": id,
        "guid": format!("guid-{id}"),
        "guidHash": format!("hash-{id}"),
        "url": format!("http://example.com/{id}"),
        "title": format!("Item {id}"),
        "author": "Jo",
        "pubDate": 1729495680,
        "updatedDate": 1729495680,
        "body": "<p>body</p>",
        "enclosureMime": "audio/mpeg",
        "enclosureLink": format!("http://example.com/{id}.mp3"),
        "feedId": 7,
        "unread": unread,
        "starred": starred,
        "lastModified": 1729495680
    })
}

fn stored_entry(id: &str, feed_id: &str, guid_hash: Option<&str>) -> Entry {
    let mut incoming = remote(id, feed_id, Some(false), Some(false));
    incoming.content.guid_hash = guid_hash.map(str::to_owned);
    Entry {
        content: incoming.content,
        read: false,
        read_synced: true,
        bookmarked: true,
        bookmarked_synced: false,
    }
}

#[tokio::test]
async fn miniflux_snapshot_pages_backwards_until_short_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/entries"))
        .and(query_param("before_entry_id", "9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "entries": [miniflux_entry(8, "read", true)]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/entries"))
        .and(query_param("direction", "desc"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "entries": [miniflux_entry(10, "unread", false), miniflux_entry(9, "unread", false)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = MinifluxBackend::new(Client::new(), &server.uri(), "user", "pass", 2);
    let batches: Vec<_> = backend.fetch_all_entries(true).try_collect().await.unwrap();

    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    let last = &batches[1][0];
    assert_eq!(last.content.id, "8");
    assert_eq!(last.content.feed_id, "1");
    assert_eq!(last.read, Some(true));
    assert_eq!(last.bookmarked, Some(true));
    assert_eq!(last.content.author_name, None);
    assert_eq!(
        last.content.updated,
        Some(Utc.with_ymd_and_hms(2024, 10, 21, 5, 28, 0).unwrap())
    );
}

#[tokio::test]
async fn miniflux_incremental_asks_for_entries_after_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/entries"))
        .and(query_param("after_entry_id", "42"))
        .and(query_param("direction", "asc"))
        .and(query_param("limit", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "entries": [miniflux_entry(43, "unread", false)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = MinifluxBackend::new(Client::new(), &server.uri(), "user", "pass", 250);
    assert_eq!(backend.cursor_kind(), CursorKind::EntryId);
    let entries = backend
        .fetch_incremental(&IncrementalCursor {
            max_entry_id: Some(42),
            last_sync: None,
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].read, Some(false));
}

#[tokio::test]
async fn miniflux_pushes_read_flags_in_one_call() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/entries"))
        .and(body_json(json!({"entry_ids": [1, 2], "status": "read"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let backend = MinifluxBackend::new(Client::new(), &server.uri(), "user", "pass", 250);
    backend
        .push_read_flags(&["1".to_string(), "2".to_string()], true)
        .await
        .unwrap();
}

#[tokio::test]
async fn miniflux_bookmark_push_only_toggles_differing_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/entries/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(miniflux_entry(5, "unread", false)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/entries/6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(miniflux_entry(6, "unread", true)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/entries/5/bookmark"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/entries/6/bookmark"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let backend = MinifluxBackend::new(Client::new(), &server.uri(), "user", "pass", 250);
    let entries = vec![stored_entry("5", "1", None), stored_entry("6", "1", None)];
    backend.push_bookmark_flags(&entries, true).await.unwrap();
}

#[tokio::test]
async fn miniflux_reports_duplicate_and_auth_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/categories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "All"}])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/feeds"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error_message": "This feed already exists."})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/feeds"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let backend = MinifluxBackend::new(Client::new(), &server.uri(), "user", "pass", 250);
    let err = backend.add_feed("http://example.com/feed").await.unwrap_err();
    assert!(matches!(err, BackendError::Duplicate(_)));
    let err = backend.list_feeds().await.unwrap_err();
    assert!(matches!(err, BackendError::Auth));
}

#[tokio::test]
async fn nextcloud_snapshot_uses_min_id_offset() {
    let server = MockServer::start().await;
    let api = "/index.php/apps/news/api/v1-3";
    Mock::given(method("GET"))
        .and(path(format!("{api}/items")))
        .and(query_param("offset", "0"))
        .and(query_param("batchSize", "2"))
        .and(query_param("getRead", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [nextcloud_item(10, true, false), nextcloud_item(9, false, true)]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{api}/items")))
        .and(query_param("offset", "9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = NextcloudBackend::new(Client::new(), &server.uri(), "user", "pass", 2);
    let batches: Vec<_> = backend.fetch_all_entries(false).try_collect().await.unwrap();

    assert_eq!(batches.len(), 2);
    assert!(batches[1].is_empty());
    let first = &batches[0][0];
    assert_eq!(first.read, Some(false));
    assert_eq!(first.content.guid_hash.as_deref(), Some("hash-10"));
    assert_eq!(first.content.enclosure.as_ref().unwrap().media_type, "audio/mpeg");
    assert_eq!(batches[0][1].bookmarked, Some(true));
}

#[tokio::test]
async fn nextcloud_incremental_uses_timestamp_cursor() {
    let server = MockServer::start().await;
    let since = Utc.with_ymd_and_hms(2024, 10, 21, 7, 28, 0).unwrap();
    Mock::given(method("GET"))
        .and(path("/index.php/apps/news/api/v1-3/items/updated"))
        .and(query_param("lastModified", since.timestamp().to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [nextcloud_item(11, true, false)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = NextcloudBackend::new(Client::new(), &server.uri(), "user", "pass", 250);
    assert_eq!(backend.cursor_kind(), CursorKind::Timestamp);
    let entries = backend
        .fetch_incremental(&IncrementalCursor {
            max_entry_id: None,
            last_sync: Some(since),
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content.id, "11");
}

#[tokio::test]
async fn nextcloud_pushes_flags_by_id_and_guid_hash() {
    let server = MockServer::start().await;
    let api = "/index.php/apps/news/api/v1-3";
    Mock::given(method("POST"))
        .and(path(format!("{api}/items/unread/multiple")))
        .and(body_json(json!({"itemIds": [3]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{api}/items/star/multiple")))
        .and(body_json(json!({"items": [{"feedId": 7, "guidHash": "abc"}]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = NextcloudBackend::new(Client::new(), &server.uri(), "user", "pass", 250);
    backend.push_read_flags(&["3".to_string()], false).await.unwrap();
    backend
        .push_bookmark_flags(&[stored_entry("3", "7", Some("abc"))], true)
        .await
        .unwrap();
}

#[tokio::test]
async fn nextcloud_maps_add_feed_conflicts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/index.php/apps/news/api/v1-3/feeds"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let backend = NextcloudBackend::new(Client::new(), &server.uri(), "user", "pass", 250);
    let err = backend.add_feed("http://example.com/feed").await.unwrap_err();
    assert!(matches!(err, BackendError::Duplicate(_)));
}

#[tokio::test]
async fn standalone_discovers_feed_from_html_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blog"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html").set_body_string(
            r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head><body></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(sample_rss()),
        )
        .mount(&server)
        .await;

    let store = Store::in_memory();
    let backend = StandaloneBackend::new(Client::new(), store.clone());
    let feed = backend
        .add_feed(&format!("{}/blog", server.uri()))
        .await
        .unwrap();
    assert_eq!(feed.id, format!("{}/feed.xml", server.uri()));
    assert_eq!(feed.title, "Test Feed");

    store.insert_feed(feed.clone()).await.unwrap();
    let err = backend.add_feed(&feed.id).await.unwrap_err();
    assert!(matches!(err, BackendError::Duplicate(_)));

    let batches: Vec<_> = backend.fetch_all_entries(true).try_collect().await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert!(batches[0].iter().all(|entry| entry.read.is_none()));

    // No native ids: repeated fetches produce the same content-derived ids.
    let again = backend
        .fetch_incremental(&IncrementalCursor::default())
        .await
        .unwrap();
    let first_ids: Vec<_> = batches[0].iter().map(|e| e.content.id.clone()).collect();
    let again_ids: Vec<_> = again.iter().map(|e| e.content.id.clone()).collect();
    assert_eq!(first_ids, again_ids);

    backend
        .push_read_flags(&first_ids, true)
        .await
        .expect("flags are local-only");
}

#[tokio::test]
async fn standalone_snapshot_fails_only_when_every_feed_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/good.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sample_rss()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Store::in_memory();
    let backend = StandaloneBackend::new(Client::new(), store.clone());
    let bad = common::feed(&format!("{}/bad.xml", server.uri()));
    store.insert_feed(bad).await.unwrap();

    let err = backend
        .fetch_all_entries(true)
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 500, .. }));

    store
        .insert_feed(common::feed(&format!("{}/good.xml", server.uri())))
        .await
        .unwrap();
    let batches: Vec<_> = backend.fetch_all_entries(true).try_collect().await.unwrap();
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 2);
}
