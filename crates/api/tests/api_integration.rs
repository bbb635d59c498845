//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use checkout::CheckoutConfig;
use common::{Money, ProductId, UserId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::{InMemoryStore, NewProduct, Store};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    store: InMemoryStore,
}

impl TestApp {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let state = api::create_default_state(store.clone(), CheckoutConfig::default(), 15);
        let app = api::create_app(state, get_metrics_handle());
        Self { app, store }
    }

    async fn product(&self, sku: &str, price_cents: i64, quantity: u32) -> ProductId {
        self.store
            .insert_product(NewProduct::new(
                format!("Product {sku}"),
                sku,
                Money::from_cents(price_cents),
                quantity,
            ))
            .await
            .unwrap()
            .id
    }

    async fn stock(&self, product_id: ProductId) -> u32 {
        self.store
            .get_product(product_id)
            .await
            .unwrap()
            .unwrap()
            .quantity
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn call(&self, method: &str, uri: &str, user: Option<UserId>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.send(request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

fn shipping() -> Value {
    json!({
        "shipping_address": {
            "name": "Ada Lovelace",
            "line1": "12 St James's Square",
            "city": "London",
            "postal_code": "SW1Y 4JH",
            "country": "GB"
        }
    })
}

#[tokio::test]
async fn test_health_check() {
    let t = TestApp::new();

    let (status, json) = t.call("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint_renders_text() {
    let t = TestApp::new();

    let response = t
        .send(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_missing_or_invalid_identity_is_unauthorized() {
    let t = TestApp::new();

    let (status, json) = t.call("GET", "/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("x-user-id"));

    let response = t
        .send(
            Request::builder()
                .uri("/orders")
                .header("x-user-id", "not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cart_add_view_update_remove() {
    let t = TestApp::new();
    let user = UserId::new();
    let product = t.product("SKU-001", 500, 10).await;

    let (status, line) = t
        .call("POST", "/cart", Some(user), Some(json!({ "product_id": product, "quantity": 2 })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(line["quantity"], 2);
    let line_id = line["id"].as_str().unwrap().to_string();

    let (status, cart) = t.call("GET", "/cart", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(cart["subtotal"], 1000);

    let (status, line) = t
        .call("PUT", &format!("/cart/{line_id}"), Some(user), Some(json!({ "quantity": 4 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(line["quantity"], 4);

    let (status, json) = t
        .call("PUT", &format!("/cart/{line_id}"), Some(user), Some(json!({ "quantity": 11 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Insufficient stock"));

    let (status, _) = t
        .call("DELETE", &format!("/cart/{line_id}"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t
        .call("DELETE", &format!("/cart/{line_id}"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cart_add_validation() {
    let t = TestApp::new();
    let user = UserId::new();
    let product = t.product("SKU-001", 500, 10).await;

    let (status, _) = t
        .call("POST", "/cart", Some(user), Some(json!({ "product_id": product, "quantity": 0 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .call(
            "POST",
            "/cart",
            Some(user),
            Some(json!({ "product_id": ProductId::new(), "quantity": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_place_order_end_to_end() {
    let t = TestApp::new();
    let user = UserId::new();
    let product = t.product("SKU-001", 500, 10).await;
    t.store.add_to_cart(user, product, 5).await.unwrap();

    let (status, order) = t.call("POST", "/orders", Some(user), Some(shipping())).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total"], 2500);
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["billing_address"], order["shipping_address"]);
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
    assert_eq!(t.stock(product).await, 5);

    let (_, cart) = t.call("GET", "/cart", Some(user), None).await;
    assert!(cart["items"].as_array().unwrap().is_empty());

    let id = order["id"].as_str().unwrap();
    let (status, loaded) = t.call("GET", &format!("/orders/{id}"), Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loaded["order_number"], order["order_number"]);

    let (status, _) = t
        .call("GET", &format!("/orders/{id}"), Some(UserId::new()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_place_order_failures_are_bad_requests() {
    let t = TestApp::new();
    let user = UserId::new();

    let (status, json) = t.call("POST", "/orders", Some(user), Some(shipping())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Cart is empty");

    let product = t.product("SKU-001", 500, 5).await;
    t.store.add_to_cart(user, product, 6).await.unwrap();

    let (status, json) = t.call("POST", "/orders", Some(user), Some(shipping())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Insufficient stock for Product SKU-001");
    assert_eq!(t.stock(product).await, 5);
}

#[tokio::test]
async fn test_commit_failure_is_internal_error() {
    let t = TestApp::new();
    let user = UserId::new();
    let product = t.product("SKU-001", 500, 5).await;
    t.store.add_to_cart(user, product, 1).await.unwrap();
    t.store.set_fail_on_commit(true);

    let (status, json) = t.call("POST", "/orders", Some(user), Some(shipping())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Failed to create order");
    assert_eq!(t.stock(product).await, 5);
}

#[tokio::test]
async fn test_cancel_order_and_repeat() {
    let t = TestApp::new();
    let user = UserId::new();
    let product = t.product("SKU-001", 500, 10).await;
    t.store.add_to_cart(user, product, 3).await.unwrap();
    let (_, order) = t.call("POST", "/orders", Some(user), Some(shipping())).await;
    let id = order["id"].as_str().unwrap();

    let (status, cancelled) = t
        .call("DELETE", &format!("/orders/{id}"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(t.stock(product).await, 10);

    let (status, json) = t
        .call("DELETE", &format!("/orders/{id}"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("cancelled"));
    assert_eq!(t.stock(product).await, 10);
}

#[tokio::test]
async fn test_admin_status_update() {
    let t = TestApp::new();
    let user = UserId::new();
    let product = t.product("SKU-001", 500, 10).await;
    t.store.add_to_cart(user, product, 1).await.unwrap();
    let (_, order) = t.call("POST", "/orders", Some(user), Some(shipping())).await;
    let id = order["id"].as_str().unwrap();

    let (status, shipped) = t
        .call(
            "PATCH",
            &format!("/admin/orders/{id}"),
            None,
            Some(json!({ "status": "shipped" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shipped["status"], "shipped");

    let (status, _) = t
        .call("DELETE", &format!("/orders/{id}"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .call(
            "PATCH",
            &format!("/admin/orders/{id}"),
            None,
            Some(json!({ "status": "teleported" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let missing = UserId::new();
    let (status, _) = t
        .call(
            "PATCH",
            &format!("/admin/orders/{missing}"),
            None,
            Some(json!({ "status": "shipped" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_orders_paginates() {
    let t = TestApp::new();
    let user = UserId::new();
    let product = t.product("SKU-001", 100, 50).await;
    for _ in 0..3 {
        t.store.add_to_cart(user, product, 1).await.unwrap();
        let (status, _) = t.call("POST", "/orders", Some(user), Some(shipping())).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = t
        .call("GET", "/orders?page=1&per_page=2", Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["total"], 3);
    assert_eq!(page["last_page"], 2);
    assert_eq!(page["current_page"], 1);

    let (_, page) = t.call("GET", "/orders", Some(user), None).await;
    assert_eq!(page["per_page"], 15);
    assert_eq!(page["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_invalid_order_id_format() {
    let t = TestApp::new();

    let (status, json) = t
        .call("GET", "/orders/not-a-uuid", Some(UserId::new()), None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Invalid ID format"));
}
