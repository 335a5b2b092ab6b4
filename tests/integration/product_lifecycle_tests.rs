use super::*;
use rust_decimal::Decimal;
use uatu_monitor::models::{NewProduct, NotificationKind, ProductId, TrackingStatus};
use uatu_monitor::AppError;

fn new_product(url: String) -> NewProduct {
    NewProduct {
        url,
        poll_interval_secs: Some(3600),
    }
}

#[tokio::test]
async fn test_complete_product_lifecycle() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let url = format!("{}/kettle", server.uri());
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;

    let mut harness = create_test_harness().await?;

    // 1. Add seeds the product without notifying
    let product = harness.scheduler.add_product(new_product(url.clone())).await?;
    assert_eq!(product.id, ProductId::for_url(&url));
    assert_eq!(product.status, TrackingStatus::Tracking);
    assert_eq!(product.display_name(), "Steel Kettle");
    assert!(harness.events.try_recv().is_err());

    // 2. The seeded product is persisted with one history point
    let stored = harness.store.load_all().await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, product.id);
    assert_eq!(harness.store.price_history(&product.id).await?.len(), 1);

    // 3. A cheaper price produces a drop event
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$19.99")).await;
    let report = harness.scheduler.check_now(&product.id).await?;
    assert!(report.success);
    assert_eq!(report.events.len(), 1);

    let event = harness.events.recv().await.expect("price drop event");
    match event.kind {
        NotificationKind::PriceDown { old, new, .. } => {
            assert_eq!(old, Decimal::new(2499, 2));
            assert_eq!(new, Decimal::new(1999, 2));
        }
        other => panic!("expected price drop, got {:?}", other),
    }

    let history = harness.store.price_history(&product.id).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].amount, Decimal::new(1999, 2));

    // 4. A rename is reported on its own
    serve_page(&server, "/kettle", product_page("Steel Kettle 1.7L", "$19.99")).await;
    harness.scheduler.check_now(&product.id).await?;
    let event = harness.events.recv().await.expect("rename event");
    assert!(matches!(event.kind, NotificationKind::NameChange { .. }));

    // 5. Disabled products refuse manual checks
    let disabled = harness.scheduler.set_tracked(&product.id, false).await?;
    assert_eq!(disabled.status, TrackingStatus::Disabled);
    let result = harness.scheduler.check_now(&product.id).await;
    assert!(matches!(result, Err(AppError::ContractViolation(_))));
    assert_eq!(harness.store.load_all().await?[0].status, TrackingStatus::Disabled);

    // 6. Removal drops the product and its history
    harness.scheduler.remove_product(&product.id).await?;
    assert!(harness.scheduler.product(&product.id).await.is_none());
    assert!(harness.store.load_all().await?.is_empty());
    assert!(harness.store.price_history(&product.id).await?.is_empty());

    harness.scheduler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_add_rejects_unusable_pages() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_page(&server, "/blog", "<html><body><h1>Our story</h1></body></html>".to_string()).await;

    let harness = create_test_harness().await?;

    let result = harness
        .scheduler
        .add_product(new_product(format!("{}/blog", server.uri())))
        .await;
    assert!(matches!(result, Err(AppError::SeedFailed { .. })));

    let result = harness.scheduler.add_product(new_product("ftp://shop.example.com/kettle".to_string())).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let result = harness
        .scheduler
        .add_product(NewProduct {
            url: format!("{}/blog", server.uri()),
            poll_interval_secs: Some(0),
        })
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    assert!(harness.scheduler.products().await.is_empty());
    assert!(harness.store.load_all().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_duplicate_url_is_rejected() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let url = format!("{}/kettle", server.uri());
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;

    let harness = create_test_harness().await?;
    harness.scheduler.add_product(new_product(url.clone())).await?;

    let result = harness.scheduler.add_product(new_product(url)).await;
    assert!(matches!(result, Err(AppError::Duplicate { .. })));
    assert_eq!(harness.scheduler.products().await.len(), 1);

    harness.scheduler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_products_survive_restart() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let url = format!("{}/kettle", server.uri());
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;

    let dir = tempfile::tempdir()?;
    let database_url = format!("sqlite://{}", dir.path().join("products.db").display());

    let product = {
        let harness = create_test_harness_with_store(ProductStore::connect(&database_url).await?).await?;
        let product = harness.scheduler.add_product(new_product(url.clone())).await?;
        let products = harness.scheduler.shutdown().await;
        harness.store.save_all(&products).await?;
        product
    };

    let harness = create_test_harness_with_store(ProductStore::connect(&database_url).await?).await?;
    let restored = harness.scheduler.restore(harness.store.load_all().await?).await;
    assert_eq!(restored, 1);

    let reloaded = harness.scheduler.product(&product.id).await.expect("restored product");
    assert_eq!(reloaded.url, url);
    assert_eq!(reloaded.status, TrackingStatus::Tracking);
    assert_eq!(
        reloaded.snapshot.as_ref().map(|s| s.price.decimal),
        Some(Decimal::new(2499, 2))
    );

    harness.scheduler.shutdown().await;
    Ok(())
}
