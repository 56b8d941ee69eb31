mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use sea_orm::EntityTrait;
use tower::ServiceExt;

use common::{cart_line, checkout_form, seed_product, test_app, test_config, TestApp};
use storefront_api::entities::product::Entity as ProductEntity;
use storefront_api::services::checkout::CheckoutOutcome;
use storefront_api::{app_router, AppState};

fn router_for(app: &TestApp) -> axum::Router {
    let state = AppState {
        db: app.db.clone(),
        config: Arc::new(test_config()),
        event_sender: app.event_sender.clone(),
        settings: app.settings.clone(),
        orders: app.orders.clone(),
        checkout: app.checkout.clone(),
        payments: app.payments.clone(),
        completion: app.completion.clone(),
    };
    app_router(state)
}

fn webhook_request(provider_id: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/payment/{}", provider_id))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn completion_webhook_completes_the_order() {
    let app = test_app().await;
    let product = seed_product(&app.db, "Book", 1500, Some(5), false).await;
    let outcome = app
        .checkout
        .process_checkout(checkout_form(vec![cart_line(&product, 2)], false))
        .await
        .unwrap();
    let order_id = assert_matches!(outcome, CheckoutOutcome::Created { order_id, .. } => order_id);

    let response = router_for(&app)
        .oneshot(webhook_request(
            "scripted",
            serde_json::json!({
                "order_id": order_id.to_string(),
                "transaction_id": "txn-webhook",
                "amount": 3000,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (order, _) = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, "completed");
    assert_eq!(order.transaction_id.as_deref(), Some("txn-webhook"));
    assert_eq!(order.paid_amount, Some(3000));

    let stock = ProductEntity::find_by_id(product.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(stock, Some(3));
}

#[tokio::test]
async fn duplicate_completion_webhooks_are_applied_once() {
    let app = test_app().await;
    let product = seed_product(&app.db, "Book", 1500, Some(5), false).await;
    let outcome = app
        .checkout
        .process_checkout(checkout_form(vec![cart_line(&product, 2)], false))
        .await
        .unwrap();
    let order_id = assert_matches!(outcome, CheckoutOutcome::Created { order_id, .. } => order_id);

    let payload = serde_json::json!({
        "order_id": order_id.to_string(),
        "transaction_id": "txn-webhook",
        "amount": 3000,
    });
    for _ in 0..3 {
        let response = router_for(&app)
            .oneshot(webhook_request("scripted", payload.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stock = ProductEntity::find_by_id(product.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(stock, Some(3));
}

#[tokio::test]
async fn unknown_provider_webhook_still_returns_200() {
    let app = test_app().await;
    let response = router_for(&app)
        .oneshot(webhook_request("nonexistent", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_webhook_payload_still_returns_200() {
    let app = test_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/payment/scripted")
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let response = router_for(&app).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
