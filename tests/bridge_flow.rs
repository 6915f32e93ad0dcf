use std::sync::Arc;

use piazza_slack::chat::SlackClient;
use piazza_slack::config::TenantRegistry;
use piazza_slack::error::{BridgeError, ConfigError, DeliveryError};
use piazza_slack::forum::PiazzaClient;
use piazza_slack::models::Delivery;
use piazza_slack::session::SessionCache;
use piazza_slack::store::{alias_partition, inmem::InMemStore, KvStore, HANDLES, TENANTS};
use piazza_slack::{Bridge, ThreadEvent};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

struct Harness {
    forum: MockServer,
    chat: MockServer,
    store: Arc<InMemStore>,
    bridge: Bridge,
}

async fn harness() -> Harness {
    let forum = MockServer::start().await;
    let chat = MockServer::start().await;
    let store = Arc::new(InMemStore::new());
    store
        .put(
            TENANTS,
            "6.031",
            &json!({
                "nid": "n1",
                "email": "6.031@bridge.example",
                "password": "pw",
                "slack_token": "xoxb-test",
                "slack_channel": "C1",
                "strip_domain": "@mit.edu"
            })
            .to_string(),
        )
        .await
        .unwrap();

    let http = reqwest::Client::new();
    let piazza = Arc::new(PiazzaClient::new(http.clone(), forum.uri()));
    let bridge = Bridge {
        forum: piazza.clone(),
        chat: Arc::new(SlackClient::new(http, chat.uri())),
        store: store.clone(),
        sessions: SessionCache::new(piazza),
        tenants: TenantRegistry::new(store.clone()),
        forum_url: "https://piazza.com".into(),
    };
    Mock::given(query_param("method", "user.login"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "session_id=tok42; Path=/")
                .set_body_json(json!({ "result": "OK" })),
        )
        .mount(&forum)
        .await;
    Mock::given(query_param("method", "network.get_users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                { "id": 1, "email": "alice@mit.edu", "role": "student" },
                { "id": 2, "email": "bob@mit.edu", "role": "student" }
            ]
        })))
        .mount(&forum)
        .await;
    Harness { forum, chat, store, bridge }
}

fn thread(children: Value) -> Value {
    json!({
        "result": {
            "id": "abc123",
            "nr": 7,
            "status": "active",
            "history": [{ "uid": 1, "subject": "Q", "content": "<p>Hi</p>" }],
            "children": children
        }
    })
}

fn event() -> ThreadEvent {
    ThreadEvent { course: "6.031".into(), cid: "abc123".into() }
}

async fn requests_for(server: &MockServer, rpc: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.query().unwrap_or_default().contains(&format!("method={rpc}")) || r.url.path().ends_with(rpc))
        .collect()
}

fn body(req: &Request) -> Value {
    serde_json::from_slice(&req.body).unwrap()
}

#[tokio::test]
async fn first_event_posts_second_event_edits() {
    let h = harness().await;
    Mock::given(query_param("method", "content.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(json!([]))))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&h.forum)
        .await;
    Mock::given(query_param("method", "content.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(json!([
            { "type": "s_answer", "history": [{ "uid": 2, "subject": "", "content": "<p>use a map</p>" }] }
        ]))))
        .mount(&h.forum)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "ts": "1700000000.000100" })))
        .expect(1)
        .mount(&h.chat)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat.update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&h.chat)
        .await;

    assert_eq!(h.bridge.handle(&event()).await.unwrap(), Delivery::Posted);
    assert_eq!(h.store.get(HANDLES, "abc123").await.unwrap().as_deref(), Some("1700000000.000100"));

    let posts = requests_for(&h.chat, "chat.postMessage").await;
    let posted = body(&posts[0]);
    assert_eq!(posts[0].headers.get("authorization").unwrap(), "Bearer xoxb-test");
    assert_eq!(posted["channel"], "C1");
    assert_eq!(posted["username"], "piazza");
    assert_eq!(posted["attachments"].as_array().unwrap().len(), 1);
    assert_eq!(posted["attachments"][0]["fallback"], "@7: Q (alice)\nHi");
    assert_eq!(posted["attachments"][0]["color"], "#8dc63f");

    assert_eq!(h.bridge.handle(&event()).await.unwrap(), Delivery::Updated);
    let updates = requests_for(&h.chat, "chat.update").await;
    let updated = body(&updates[0]);
    assert_eq!(updated["ts"], "1700000000.000100");
    assert_eq!(updated["channel"], "C1");
    let attachments = updated["attachments"].as_array().unwrap();
    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[1]["fallback"], "Student Answer (bob): use a map");

    // both renders ran on one forum session
    assert_eq!(requests_for(&h.forum, "user.login").await.len(), 1);
    assert_eq!(requests_for(&h.forum, "network.get_users").await.len(), 2);
}

#[tokio::test]
async fn aliases_rewrite_display_names() {
    let h = harness().await;
    h.store.put(&alias_partition("6.031"), "alice@mit.edu", "ally").await.unwrap();
    Mock::given(query_param("method", "content.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(json!([]))))
        .mount(&h.forum)
        .await;
    Mock::given(path("/chat.postMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "ts": "1.0" })))
        .mount(&h.chat)
        .await;

    h.bridge.handle(&event()).await.unwrap();
    let posted = body(&requests_for(&h.chat, "chat.postMessage").await[0]);
    assert_eq!(posted["attachments"][0]["fallback"], "@7: Q (ally)\nHi");
}

#[tokio::test]
async fn expired_session_is_replaced_once() {
    let h = harness().await;
    Mock::given(query_param("method", "content.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "Not logged in" })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&h.forum)
        .await;
    Mock::given(query_param("method", "content.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(json!([]))))
        .mount(&h.forum)
        .await;
    Mock::given(path("/chat.postMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "ts": "1.0" })))
        .mount(&h.chat)
        .await;

    assert_eq!(h.bridge.handle(&event()).await.unwrap(), Delivery::Posted);
    assert_eq!(requests_for(&h.forum, "user.login").await.len(), 2);
}

#[tokio::test]
async fn rejected_post_records_nothing() {
    let h = harness().await;
    Mock::given(query_param("method", "content.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(json!([]))))
        .mount(&h.forum)
        .await;
    Mock::given(path("/chat.postMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": false, "error": "channel_not_found" })))
        .mount(&h.chat)
        .await;

    let err = h.bridge.handle(&event()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Delivery(DeliveryError::NotOk { ref error, .. }) if error == "channel_not_found"));
    assert!(h.store.get(HANDLES, "abc123").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_fetch_sends_nothing_to_chat() {
    let h = harness().await;
    Mock::given(query_param("method", "content.get"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.forum)
        .await;

    let err = h.bridge.handle(&event()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Content(_)));
    assert!(h.chat.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn unknown_course_is_a_config_error() {
    let h = harness().await;
    let err = h
        .bridge
        .handle(&ThreadEvent { course: "nope".into(), cid: "abc123".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Config(ConfigError::UnknownTenant(_))));
    assert!(h.forum.received_requests().await.unwrap_or_default().is_empty());
}
