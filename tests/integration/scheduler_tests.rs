use super::*;
use uatu_monitor::models::{NewProduct, NotificationKind, TrackingStatus};

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_timer_detects_price_change() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;

    let mut harness = create_test_harness().await?;
    let product = harness
        .scheduler
        .add_product(NewProduct {
            url: format!("{}/kettle", server.uri()),
            poll_interval_secs: Some(1),
        })
        .await?;

    serve_page(&server, "/kettle", product_page("Steel Kettle", "$29.99")).await;

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), harness.events.recv())
        .await?
        .expect("price event");
    assert!(matches!(event.kind, NotificationKind::PriceUp { .. }));
    assert_eq!(event.product_id, product.id);

    harness.scheduler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_offline_ticks_are_skipped() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;

    let harness = create_test_harness().await?;
    harness.online.send_replace(false);
    harness
        .scheduler
        .add_product(NewProduct {
            url: format!("{}/kettle", server.uri()),
            poll_interval_secs: Some(1),
        })
        .await?;

    // serve_page reset the request log; only ticks count from here
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert_eq!(request_count(&server).await, 0);

    harness.online.send_replace(true);
    let server_ref = &server;
    assert!(wait_for_condition(|| async move { request_count(server_ref).await > 0 }, 5).await);

    harness.scheduler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_sustained_failure_warns_once() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;

    let mut harness = create_test_harness().await?;
    let product = harness
        .scheduler
        .add_product(NewProduct {
            url: format!("{}/kettle", server.uri()),
            poll_interval_secs: Some(3600),
        })
        .await?;

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // Threshold is two in the test configuration
    let first = harness.scheduler.check_now(&product.id).await?;
    assert!(!first.success);
    assert_eq!(first.status, TrackingStatus::Tracking);

    let second = harness.scheduler.check_now(&product.id).await?;
    assert_eq!(second.status, TrackingStatus::Error);
    assert_eq!(second.failure_count, 2);

    let third = harness.scheduler.check_now(&product.id).await?;
    assert_eq!(third.failure_count, 3);
    assert!(third.events.is_empty());

    let event = harness.events.recv().await.expect("warning event");
    assert!(matches!(event.kind, NotificationKind::Warning { failures: 2, .. }));
    assert!(harness.events.try_recv().is_err());

    // Recovery clears the error state without a price event
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$24.99")).await;
    let recovered = harness.scheduler.check_now(&product.id).await?;
    assert!(recovered.success);
    assert_eq!(recovered.status, TrackingStatus::Tracking);
    assert_eq!(recovered.failure_count, 0);
    assert!(harness.events.try_recv().is_err());

    harness.scheduler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_manual_checks_share_the_limit() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    for i in 0..4 {
        Mock::given(method("GET"))
            .and(path(format!("/item-{}", i)))
            .respond_with(ResponseTemplate::new(200).set_body_string(product_page(&format!("Item {}", i), "$5.00")))
            .mount(&server)
            .await;
    }

    let harness = create_test_harness().await?;
    let mut ids = Vec::new();
    for i in 0..4 {
        let product = harness
            .scheduler
            .add_product(NewProduct {
                url: format!("{}/item-{}", server.uri(), i),
                poll_interval_secs: Some(3600),
            })
            .await?;
        ids.push(product.id);
    }

    let checks = ids.iter().map(|id| harness.scheduler.check_now(id));
    let reports = futures::future::try_join_all(checks).await?;
    assert!(reports.iter().all(|r| r.success));
    assert_eq!(harness.scheduler.products().await.len(), 4);

    harness.scheduler.shutdown().await;
    Ok(())
}
