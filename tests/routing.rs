//! Integration tests for route matching and target rendering.

use xrouter::routes::table::RouteTable;
use xrouter::routes::{host_without_port, MatchInput, Route, RouteRecord};
use xrouter::store::{Action, Event};

fn set(index: u64, name: &str, domain: Option<&str>, path: Option<&str>, target: &str) -> Event {
    Event {
        action: Action::Set,
        key: format!("routes/{name}"),
        value: Some(
            serde_json::json!({
                "name": name,
                "domain": domain,
                "path": path,
                "target": target,
            })
            .to_string(),
        ),
        index,
    }
}

async fn resolve(table: &RouteTable, host: &str, path: &str) -> Option<(String, String)> {
    let input = MatchInput {
        host: Some(host_without_port(host)),
        path,
    };
    let (route, captures) = table.resolve(input).await.ok()?;
    let target = route.render_target(&captures).ok()?;
    Some((route.name().to_string(), target))
}

#[tokio::test]
async fn creation_order_decides_between_overlapping_routes() {
    let table = RouteTable::new();
    table
        .apply(&set(1, "users", None, Some("/api/users/{id}"), "http://users/{id}"))
        .await;
    table
        .apply(&set(2, "api", None, Some("/api/{rest:.*}"), "http://api/{rest}"))
        .await;
    table
        .apply(&set(3, "site", Some("{app}.example.com"), None, "http://{app}.web/"))
        .await;
    table.apply(&set(4, "fallback", None, None, "http://default/")).await;

    assert_eq!(
        resolve(&table, "x", "/api/users/42").await,
        Some(("users".into(), "http://users/42".into()))
    );
    assert_eq!(
        resolve(&table, "x", "/api/orders/7/lines").await,
        Some(("api".into(), "http://api/orders/7/lines".into()))
    );
    assert_eq!(
        resolve(&table, "shop.example.com:8080", "/cart").await,
        Some(("site".into(), "http://shop.web/".into()))
    );
    assert_eq!(
        resolve(&table, "other.org", "/cart").await,
        Some(("fallback".into(), "http://default/".into()))
    );
}

#[tokio::test]
async fn domain_matching_ignores_case() {
    let table = RouteTable::new();
    table
        .apply(&set(1, "site", Some("{app}.Example.com"), None, "http://{app}/"))
        .await;

    let (name, target) = resolve(&table, "Shop.EXAMPLE.com", "/").await.unwrap();
    assert_eq!(name, "site");
    assert_eq!(target, "http://shop/");
}

#[tokio::test]
async fn single_segment_capture_does_not_cross_slashes() {
    let table = RouteTable::new();
    table
        .apply(&set(1, "item", None, Some("/items/{id}"), "http://b/{id}"))
        .await;

    assert!(resolve(&table, "h", "/items/1/2").await.is_none());
    assert!(resolve(&table, "h", "/items/").await.is_none());
    assert_eq!(
        resolve(&table, "h", "/items/a%20b").await.unwrap().1,
        "http://b/a%20b"
    );
}

#[tokio::test]
async fn deleted_routes_stop_matching() {
    let table = RouteTable::new();
    table.apply(&set(1, "a", None, Some("/a"), "http://a/")).await;
    table
        .apply(&Event {
            action: Action::Delete,
            key: "routes/a".into(),
            value: None,
            index: 2,
        })
        .await;

    assert!(resolve(&table, "h", "/a").await.is_none());
}

#[test]
fn compiled_route_exposes_its_record() {
    let record = RouteRecord {
        name: "web".into(),
        domain: None,
        path: Some("/w/{x}".into()),
        target: "http://w/{x}".into(),
    };
    let route = Route::compile(record.clone()).unwrap();
    assert_eq!(route.record(), &record);
    assert_eq!(route.name(), "web");
}
