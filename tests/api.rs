//! Integration tests for the route management API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::oneshot;

use xrouter::health::HealthResponse;
use xrouter::routes::sync::{SyncHandle, SyncSettings, Synchronizer};
use xrouter::routes::table::RouteTable;
use xrouter::server::{self, ApiState};
use xrouter::store::memory::MemoryStore;
use xrouter::store::{route_key, StoreClient};

struct Api {
    addr: SocketAddr,
    client: reqwest::Client,
    sync: SyncHandle,
    shutdown: oneshot::Sender<()>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    /// Poll `path` until it answers with `status` or two seconds pass.
    async fn wait_for_status(&self, path: &str, status: u16) -> bool {
        for _ in 0..200 {
            if self.get(path).await.status() == status {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.sync.stop().await;
    }
}

async fn start_api(seed: usize) -> Api {
    let store = Arc::new(MemoryStore::new());
    for i in 0..seed {
        let name = format!("r{i:02}");
        let value = json!({
            "name": name,
            "domain": null,
            "path": format!("/{name}"),
            "target": "http://backend/",
        });
        store.set(&route_key(&name), &value.to_string()).await.unwrap();
    }

    let table = Arc::new(RouteTable::new());
    let settings = SyncSettings {
        watch_timeout: Duration::from_millis(500),
        ..SyncSettings::default()
    };
    let synchronizer = Synchronizer::new(store.clone(), Arc::clone(&table), settings);
    let fencing = synchronizer.bootstrap().await;
    let sync = synchronizer.start(fencing);

    let state = Arc::new(ApiState {
        table,
        store,
        start_time: Instant::now(),
    });
    let router = server::build_api_router(state, 1_048_576);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    Api {
        addr,
        client: reqwest::Client::new(),
        sync,
        shutdown,
    }
}

fn item_names(body: &Value) -> Vec<String> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn middle_page_links_both_ways() {
    let api = start_api(25).await;

    let resp = api.get("/route?offset=10&page_size=10").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    let expected: Vec<String> = (10..20).map(|i| format!("r{i:02}")).collect();
    assert_eq!(item_names(&body), expected);
    assert_eq!(body["items"][0]["kind"], "gilliam#route");
    assert_eq!(body["links"]["self"], "/route?offset=10&page_size=10");
    assert_eq!(body["links"]["prev"], "/route?offset=0&page_size=10");
    assert_eq!(body["links"]["next"], "/route?offset=20&page_size=10");

    api.stop().await;
}

#[tokio::test]
async fn last_page_has_prev_but_no_next() {
    let api = start_api(25).await;

    let body: Value = api
        .get("/route?offset=20&page_size=10")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(item_names(&body).len(), 5);
    assert!(body["links"].get("prev").is_some());
    assert!(body["links"].get("next").is_none());

    api.stop().await;
}

#[tokio::test]
async fn default_page_is_first_ten() {
    let api = start_api(25).await;

    let body: Value = api.get("/route").await.json().await.unwrap();
    assert_eq!(item_names(&body).len(), 10);
    assert!(body["links"].get("prev").is_none());
    assert_eq!(body["links"]["self"], "/route?offset=0&page_size=10");

    api.stop().await;
}

#[tokio::test]
async fn non_integer_paging_is_bad_request() {
    let api = start_api(3).await;

    let resp = api.get("/route?offset=abc").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["details"][0]["field"], "offset");

    api.stop().await;
}

#[tokio::test]
async fn create_then_show_then_delete() {
    let api = start_api(0).await;

    let resp = api
        .client
        .post(api.url("/route"))
        .json(&json!({
            "name": "web",
            "domain": "{sub}.example.com",
            "path": null,
            "target": "http://{sub}.backend/",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert_eq!(resp.headers()["location"], "/route/web");
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["kind"], "gilliam#route");
    assert_eq!(created["domain"], "{sub}.example.com");
    assert!(created["path"].is_null());

    assert!(api.wait_for_status("/route/web", 200).await);
    let shown: Value = api.get("/route/web").await.json().await.unwrap();
    assert_eq!(shown, created);

    let resp = api
        .client
        .delete(api.url("/route/web"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert!(api.wait_for_status("/route/web", 404).await);

    api.stop().await;
}

#[tokio::test]
async fn create_with_missing_fields_is_bad_request() {
    let api = start_api(0).await;

    let resp = api
        .client
        .post(api.url("/route"))
        .json(&json!({"name": "web", "target": "http://backend/"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, ["domain", "path"]);

    api.stop().await;
}

#[tokio::test]
async fn create_with_invalid_pattern_is_bad_request() {
    let api = start_api(0).await;

    let resp = api
        .client
        .post(api.url("/route"))
        .json(&json!({
            "name": "web",
            "domain": null,
            "path": "/api/{id",
            "target": "http://backend/",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = api
        .client
        .post(api.url("/route"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    api.stop().await;
}

#[tokio::test]
async fn dot_segment_names_are_bad_request() {
    let api = start_api(0).await;

    for name in [".", ".."] {
        let resp = api
            .client
            .post(api.url("/route"))
            .json(&json!({
                "name": name,
                "domain": null,
                "path": "/x",
                "target": "http://backend/",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{name}");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["details"][0]["field"], "name");
    }

    api.stop().await;
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let api = start_api(1).await;

    assert_eq!(api.get("/route/nope").await.status(), 404);
    let resp = api
        .client
        .delete(api.url("/route/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    api.stop().await;
}

#[tokio::test]
async fn health_reports_replica_state() {
    let api = start_api(4).await;

    let health: HealthResponse = api.get("/health").await.json().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.routes.store, "memory");
    assert_eq!(health.routes.count, 4);
    assert_eq!(health.routes.resume_index, Some(5));

    api.stop().await;
}
