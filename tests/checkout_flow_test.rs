mod common;

use assert_matches::assert_matches;
use sea_orm::EntityTrait;

use common::{cart_line, checkout_form, seed_product, seed_product_with_status, test_app};
use storefront_api::entities::order::Entity as OrderEntity;
use storefront_api::entities::order_item::Entity as OrderItemEntity;
use storefront_api::entities::product::Entity as ProductEntity;
use storefront_api::errors::ServiceError;
use storefront_api::services::checkout::CheckoutOutcome;
use storefront_api::services::settings::KEY_SHIPPING_FLAT_AMOUNT;
use storefront_api::services::stock::StockAction;

#[tokio::test]
async fn clean_checkout_creates_order_with_items() {
    let app = test_app().await;
    let book = seed_product(&app.db, "Book", 1500, Some(10), false).await;
    let mug = seed_product(&app.db, "Mug", 800, Some(5), false).await;

    let outcome = app
        .checkout
        .process_checkout(checkout_form(
            vec![cart_line(&book, 2), cart_line(&mug, 1)],
            false,
        ))
        .await
        .unwrap();

    let order_id = match outcome {
        CheckoutOutcome::Created {
            order_id, total, ..
        } => {
            assert_eq!(total, 3800);
            order_id
        }
        other => panic!("expected created, got {:?}", other),
    };

    let (order, items) = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, "pending");
    assert_eq!(order.payment_status, "created");
    assert_eq!(order.subtotal, 3800);
    assert_eq!(items.len(), 2);
    assert!(order.order_number.starts_with("ORD-"));

    // Stock is untouched until payment completes.
    let book_row = ProductEntity::find_by_id(book.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(book_row.stock, Some(10));
}

#[tokio::test]
async fn tampered_negative_quantity_is_rejected() {
    let app = test_app().await;
    let book = seed_product(&app.db, "Book", 1500, Some(5), false).await;

    for quantity in [0, -3] {
        let mut line = cart_line(&book, 1);
        line.quantity = quantity;
        let err = app
            .checkout
            .process_checkout(checkout_form(vec![line], false))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    // Neither an order nor a negative-subtotal artifact exists; stock is
    // untouched.
    assert!(OrderEntity::find().all(&*app.db).await.unwrap().is_empty());
    let stock = ProductEntity::find_by_id(book.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(stock, Some(5));
}

#[tokio::test]
async fn hard_error_leaves_no_rows_behind() {
    let app = test_app().await;
    let active = seed_product(&app.db, "Active", 1000, Some(5), false).await;
    let archived =
        seed_product_with_status(&app.db, "Archived", 2000, Some(5), false, "archived").await;

    let err = app
        .checkout
        .process_checkout(checkout_form(
            vec![cart_line(&active, 1), cart_line(&archived, 1)],
            false,
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    assert!(OrderEntity::find().all(&*app.db).await.unwrap().is_empty());
    assert!(OrderItemEntity::find()
        .all(&*app.db)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn stale_price_is_rejected() {
    let app = test_app().await;
    let product = seed_product(&app.db, "Lamp", 3000, Some(5), false).await;

    let mut line = cart_line(&product, 1);
    line.price = 2500;
    let err = app
        .checkout
        .process_checkout(checkout_form(vec![line], false))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("changed"));
}

#[tokio::test]
async fn insufficient_stock_needs_confirmation_then_creates_reduced_order() {
    let app = test_app().await;
    let product = seed_product(&app.db, "Poster", 500, Some(2), false).await;

    // Phase 1: 5 requested, 2 available.
    let outcome = app
        .checkout
        .process_checkout(checkout_form(vec![cart_line(&product, 5)], false))
        .await
        .unwrap();
    match &outcome {
        CheckoutOutcome::NeedsConfirmation {
            stock_issues,
            adjusted_total,
        } => {
            assert_eq!(stock_issues.len(), 1);
            assert_eq!(stock_issues[0].action, StockAction::Reduced);
            assert_eq!(stock_issues[0].requested_quantity, 5);
            assert_eq!(stock_issues[0].available_quantity, 2);
            assert_eq!(*adjusted_total, 1000);
        }
        other => panic!("expected needs_confirmation, got {:?}", other),
    }
    assert!(OrderEntity::find().all(&*app.db).await.unwrap().is_empty());

    // Phase 2: same cart resubmitted confirmed.
    let outcome = app
        .checkout
        .process_checkout(checkout_form(vec![cart_line(&product, 5)], true))
        .await
        .unwrap();
    let order_id = assert_matches!(outcome, CheckoutOutcome::Created { order_id, .. } => order_id);

    let (order, items) = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    assert_eq!(order.subtotal, 1000);
}

#[tokio::test]
async fn zero_stock_line_is_dropped_on_confirmation() {
    let app = test_app().await;
    let gone = seed_product(&app.db, "Gone", 900, Some(0), false).await;
    let available = seed_product(&app.db, "Available", 1200, Some(3), false).await;

    let outcome = app
        .checkout
        .process_checkout(checkout_form(
            vec![cart_line(&gone, 1), cart_line(&available, 1)],
            false,
        ))
        .await
        .unwrap();
    assert_matches!(
        &outcome,
        CheckoutOutcome::NeedsConfirmation { stock_issues, .. }
            if stock_issues[0].action == StockAction::Removed
    );

    let outcome = app
        .checkout
        .process_checkout(checkout_form(
            vec![cart_line(&gone, 1), cart_line(&available, 1)],
            true,
        ))
        .await
        .unwrap();
    let order_id = assert_matches!(outcome, CheckoutOutcome::Created { order_id, .. } => order_id);

    let (order, items) = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].product_id, available.id);
    assert_eq!(order.subtotal, 1200);
}

#[tokio::test]
async fn fully_out_of_stock_confirmed_cart_is_an_error() {
    let app = test_app().await;
    let gone = seed_product(&app.db, "Gone", 900, Some(0), false).await;

    let err = app
        .checkout
        .process_checkout(checkout_form(vec![cart_line(&gone, 1)], true))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(OrderEntity::find().all(&*app.db).await.unwrap().is_empty());
}

#[tokio::test]
async fn digital_only_order_suppresses_shipping() {
    let app = test_app().await;
    app.settings
        .set(KEY_SHIPPING_FLAT_AMOUNT, "500", "operational")
        .await
        .unwrap();
    let ebook = seed_product(&app.db, "Ebook", 1900, None, true).await;

    let outcome = app
        .checkout
        .process_checkout(checkout_form(vec![cart_line(&ebook, 1)], false))
        .await
        .unwrap();
    let order_id = assert_matches!(outcome, CheckoutOutcome::Created { order_id, .. } => order_id);

    let (order, _) = app.orders.get_order(order_id).await.unwrap();
    assert!(order.is_digital);
    assert_eq!(order.shipping_amount, 0);
    assert_eq!(order.shipping_address, None);
    assert_eq!(order.shipping_country, None);
}

#[tokio::test]
async fn physical_order_pays_configured_flat_shipping() {
    let app = test_app().await;
    app.settings
        .set(KEY_SHIPPING_FLAT_AMOUNT, "500", "operational")
        .await
        .unwrap();
    let chair = seed_product(&app.db, "Chair", 7000, Some(4), false).await;

    let outcome = app
        .checkout
        .process_checkout(checkout_form(vec![cart_line(&chair, 1)], false))
        .await
        .unwrap();
    let order_id = assert_matches!(outcome, CheckoutOutcome::Created { order_id, .. } => order_id);

    let (order, _) = app.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.shipping_amount, 500);
    assert_eq!(order.total(), 7500);
}

#[tokio::test]
async fn physical_order_without_address_is_rejected() {
    let app = test_app().await;
    let chair = seed_product(&app.db, "Chair", 7000, Some(4), false).await;

    let mut form = checkout_form(vec![cart_line(&chair, 1)], false);
    form.shipping_address = None;
    let err = app.checkout.process_checkout(form).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
