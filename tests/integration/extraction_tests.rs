use super::*;
use rust_decimal::Decimal;
use uatu_monitor::loader::LoadFailure;
use uatu_monitor::models::ExtractionSource;
use uatu_monitor::state_machine::CheckFailure;

#[tokio::test]
async fn test_extracts_from_schema_markup() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_page(&server, "/kettle", product_page("Steel Kettle", "$19.99")).await;

    let manager = create_test_manager()?;
    let snapshot = manager
        .check_url(&format!("{}/kettle", server.uri()))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    assert_eq!(snapshot.display_name, "Steel Kettle");
    assert!(snapshot.price.valid);
    assert_eq!(snapshot.price.decimal, Decimal::new(1999, 2));
    assert!(matches!(snapshot.source, ExtractionSource::TextNode { .. }));

    Ok(())
}

#[tokio::test]
async fn test_meta_attribute_wins_over_visible_text() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let page = r#"<html><head>
        <meta property="og:title" content="Espresso Machine">
        <meta property="product:price:amount" content="249.00">
    </head><body><span class="price">Was $299.00</span></body></html>"#;
    serve_page(&server, "/espresso", page.to_string()).await;

    let snapshot = create_test_manager()?
        .check_url(&format!("{}/espresso", server.uri()))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    assert_eq!(snapshot.display_name, "Espresso Machine");
    assert_eq!(snapshot.price.decimal, Decimal::new(24900, 2));
    assert!(matches!(snapshot.source, ExtractionSource::Attribute { .. }));

    Ok(())
}

#[tokio::test]
async fn test_european_format_resolves_currency_from_lang() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let page = r#"<html lang="de-DE"><body>
        <h1>Wasserkocher</h1><div class="product-price">1.299,50 €</div>
    </body></html>"#;
    serve_page(&server, "/wasserkocher", page.to_string()).await;

    let snapshot = create_test_manager()?
        .check_url(&format!("{}/wasserkocher", server.uri()))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    assert_eq!(snapshot.price.decimal, Decimal::new(129950, 2));
    assert_eq!(snapshot.price.currency_code.as_deref(), Some("EUR"));

    Ok(())
}

#[tokio::test]
async fn test_redirect_to_home_page_is_not_found() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/discontinued"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", format!("{}/", server.uri()).as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><p>Welcome</p></body></html>"))
        .mount(&server)
        .await;

    let outcome = create_test_manager()?
        .check_url(&format!("{}/discontinued", server.uri()))
        .await;

    match outcome {
        Err(CheckFailure::NotFoundAfterRedirect { final_url }) => assert!(final_url.ends_with('/')),
        other => panic!("expected not-found-after-redirect, got {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn test_http_error_is_a_load_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let outcome = create_test_manager()?
        .check_url(&format!("{}/missing", server.uri()))
        .await;

    assert_eq!(outcome.unwrap_err(), CheckFailure::Load(LoadFailure::Status(404)));

    Ok(())
}

#[tokio::test]
async fn test_page_without_price_is_extraction_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    serve_page(&server, "/blog", "<html><body><h1>Our story</h1></body></html>".to_string()).await;

    let outcome = create_test_manager()?
        .check_url(&format!("{}/blog", server.uri()))
        .await;

    assert_eq!(outcome.unwrap_err(), CheckFailure::Extraction);

    Ok(())
}
