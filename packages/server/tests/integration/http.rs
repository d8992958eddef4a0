use serde_json::json;

use crate::common::{DESCRIPTION, Harness, JPEG_BYTES, TestApp, routes};

#[tokio::test]
async fn ingest_and_read_over_http() {
    let harness = Harness::new();
    harness.fetcher.serve_jpeg("https://example.com/a.jpg");
    let app = TestApp::spawn(harness, None).await;

    let created = app
        .post(routes::IMAGES, &json!({ "url": "https://example.com/a.jpg" }))
        .await;
    assert_eq!(created.status, 201);
    let id = created.body["id"].as_str().unwrap().to_string();

    let again = app
        .post(routes::IMAGES, &json!({ "url": "https://example.com/a.jpg" }))
        .await;
    assert_eq!(again.status, 200);
    assert_eq!(again.body["id"], id.as_str());

    let first = app.get(&routes::image(&id)).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.bytes, JPEG_BYTES);
    assert_eq!(first.header("content-type"), Some("image/jpeg"));
    assert_eq!(first.header("x-image-id"), Some(id.as_str()));
    assert_eq!(first.header("x-image-description"), Some("pending"));
    assert_eq!(
        first.header("cache-control"),
        Some("public, max-age=30, stale-while-revalidate=60")
    );
    assert!(first.header("etag").is_some());

    app.harness.funnel.drain().await;

    let second = app.get(&routes::image(&id)).await;
    assert_eq!(second.header("x-image-description"), Some(DESCRIPTION));
    assert_eq!(
        second.header("cache-control"),
        Some("public, max-age=31536000, immutable")
    );

    let metadata = app.get(&routes::image_metadata(&id)).await;
    assert_eq!(metadata.status, 200);
    assert_eq!(metadata.body["status"], "described");
    assert_eq!(metadata.body["description"], DESCRIPTION);
    assert_eq!(metadata.body["source_url"], "https://example.com/a.jpg");

    assert_eq!(app.harness.describer.calls(), 1);
}

#[tokio::test]
async fn metadata_reads_do_not_trigger_enrichment() {
    let harness = Harness::new();
    let id = harness.seed_image(None).to_string();
    let app = TestApp::spawn(harness, None).await;

    let metadata = app.get(&routes::image_metadata(&id)).await;
    assert_eq!(metadata.status, 200);
    assert_eq!(metadata.body["status"], "pending");
    assert!(metadata.body["description"].is_null());

    app.harness.funnel.drain().await;
    assert_eq!(app.harness.describer.calls(), 0);
}

#[tokio::test]
async fn conditional_get_returns_not_modified() {
    let harness = Harness::new();
    let id = harness.seed_image(Some("A dog.")).to_string();
    let app = TestApp::spawn(harness, None).await;

    let first = app.get(&routes::image(&id)).await;
    let etag = first.header("etag").unwrap().to_string();

    let second = app.get_if_none_match(&routes::image(&id), &etag).await;
    assert_eq!(second.status, 304);
    assert!(second.bytes.is_empty());
    assert_eq!(second.header("x-image-description"), Some("A dog."));

    let third = app
        .get_if_none_match(&routes::image(&id), "\"something-else\"")
        .await;
    assert_eq!(third.status, 200);
}

#[tokio::test]
async fn ids_are_case_insensitive() {
    let harness = Harness::new();
    let id = harness.seed_image(Some("A dog.")).to_string();
    let app = TestApp::spawn(harness, None).await;

    let res = app.get(&routes::image(&id.to_uppercase())).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.header("x-image-id"), Some(id.as_str()));
}

#[tokio::test]
async fn invalid_and_unknown_ids() {
    let app = TestApp::spawn(Harness::new(), None).await;

    let invalid = app.get(&routes::image("not-a-uuid")).await;
    assert_eq!(invalid.status, 400);
    assert_eq!(invalid.body["code"], "VALIDATION_ERROR");

    let unknown = app
        .get(&routes::image("9b2f4c1e-7d3a-4f5b-8c6d-0e1f2a3b4c5d"))
        .await;
    assert_eq!(unknown.status, 404);
    assert_eq!(unknown.body["code"], "NOT_FOUND");

    let metadata = app
        .get(&routes::image_metadata("9b2f4c1e-7d3a-4f5b-8c6d-0e1f2a3b4c5d"))
        .await;
    assert_eq!(metadata.status, 404);
}

#[tokio::test]
async fn ingest_errors_map_to_codes() {
    let harness = Harness::new();
    harness.fetcher.serve(
        "https://example.com/down.jpg",
        crate::common::SourceReply::Status(503),
    );
    let app = TestApp::spawn(harness, None).await;

    let loopback = app
        .post(routes::IMAGES, &json!({ "url": "http://127.0.0.1/a.jpg" }))
        .await;
    assert_eq!(loopback.status, 400);
    assert_eq!(loopback.body["code"], "VALIDATION_ERROR");

    let upstream = app
        .post(routes::IMAGES, &json!({ "url": "https://example.com/down.jpg" }))
        .await;
    assert_eq!(upstream.status, 502);
    assert_eq!(upstream.body["code"], "UPSTREAM_FETCH_FAILED");

    let malformed = app.post(routes::IMAGES, &json!({ "link": "x" })).await;
    assert_eq!(malformed.status, 400);
    assert_eq!(malformed.body["code"], "VALIDATION_ERROR");

    assert_eq!(app.harness.fetcher.calls(), 1);
}

#[tokio::test]
async fn blob_store_outage_is_service_unavailable() {
    let harness = Harness::new();
    let id = harness.seed_image(None).to_string();
    harness
        .blobs
        .fail_gets
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let app = TestApp::spawn(harness, None).await;

    let res = app.get(&routes::image(&id)).await;
    assert_eq!(res.status, 503);
    assert_eq!(res.body["code"], "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn description_edit_requires_admin_token() {
    let harness = Harness::new();
    let id = harness.seed_image(None).to_string();
    let app = TestApp::spawn(harness, Some("s3cret")).await;
    let body = json!({ "description": "<em>Two</em> cats & a dog" });

    let missing = app.put(&routes::image_description(&id), &body, None).await;
    assert_eq!(missing.status, 401);
    assert_eq!(missing.body["code"], "TOKEN_MISSING");

    let wrong = app
        .put(&routes::image_description(&id), &body, Some("nope"))
        .await;
    assert_eq!(wrong.status, 401);
    assert_eq!(wrong.body["code"], "TOKEN_INVALID");

    let ok = app
        .put(&routes::image_description(&id), &body, Some("s3cret"))
        .await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.body["description"], "Two cats &amp; a dog");

    let read = app.get(&routes::image(&id)).await;
    assert_eq!(read.header("x-image-description"), Some("Two cats &amp; a dog"));
    app.harness.funnel.drain().await;
    assert_eq!(app.harness.describer.calls(), 0);
}

#[tokio::test]
async fn blank_description_edit_is_rejected() {
    let harness = Harness::new();
    let id = harness.seed_image(None).to_string();
    let app = TestApp::spawn(harness, None).await;

    let res = app
        .put(
            &routes::image_description(&id),
            &json!({ "description": "   " }),
            None,
        )
        .await;
    assert_eq!(res.status, 400);
    assert_eq!(res.body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn openapi_document_lists_image_routes() {
    let app = TestApp::spawn(Harness::new(), None).await;

    let doc = app.get(routes::OPENAPI).await;
    assert_eq!(doc.status, 200);
    let paths = doc.body["paths"].as_object().unwrap();
    assert!(paths.contains_key("/api/v1/images"));
    assert!(paths.contains_key("/api/v1/images/{id}"));
    assert!(paths.contains_key("/api/v1/images/{id}/metadata"));
    assert!(paths.contains_key("/api/v1/images/{id}/description"));
}
