//! End-to-end tests for rotation and upload.
//!
//! AppendLog → Rotator → Uploader → MockStore
//!
//! Time-driven tests run on a paused clock, so poll periods and backoff
//! delays elapse instantly and exactly.

use std::time::Duration;

use integration_tests::fixtures::{self, EventKind};
use integration_tests::setup::{TestContext, TestOptions};
use relay_core::OutputFormat;
use uploader::check_bucket_access;
use uploader::health::guidance;
use worker::RotationOutcome;

#[tokio::test(start_paused = true)]
async fn test_size_trigger_uploads_once_and_resets() {
    let ctx = TestContext::with_options(TestOptions {
        max_file_size: 100,
        ..Default::default()
    })
    .await;

    // Three records of 50 bytes each, separator included.
    for _ in 0..3 {
        ctx.log
            .append(fixtures::sized_event(49).as_bytes())
            .await
            .unwrap();
    }
    assert_eq!(ctx.log.size(), 150);

    let rotation = ctx.start_rotation();
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(ctx.store.object_count(), 1);
    assert_eq!(ctx.log.size(), 0);
    assert_eq!(ctx.log.event_count(), 0);
    assert_eq!(ctx.log_contents().await, "");

    let object = &ctx.store.objects()[0];
    assert!(object.key.starts_with("xml-events/"));
    assert!(object.key.ends_with(".xml"));
    assert_eq!(object.text().matches("<EVENT>").count(), 3);

    ctx.shutdown().await;
    rotation.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_time_trigger() {
    let ctx = TestContext::with_options(TestOptions {
        rotation_interval: Duration::from_secs(120),
        check_interval: Duration::from_secs(60),
        ..Default::default()
    })
    .await;
    ctx.log
        .append(fixtures::event(EventKind::Alarm, 1).as_bytes())
        .await
        .unwrap();

    let rotation = ctx.start_rotation();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(ctx.store.object_count(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(ctx.store.object_count(), 1);
    assert_eq!(ctx.log.size(), 0);

    ctx.shutdown().await;
    rotation.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_upload_keeps_batch_until_next_trigger() {
    let ctx = TestContext::with_options(TestOptions {
        max_file_size: 100,
        ..Default::default()
    })
    .await;
    ctx.store.set_fail_always(Some("AccessDenied"));

    for i in 0..3 {
        ctx.log
            .append(fixtures::event(EventKind::AccessDenied, i).as_bytes())
            .await
            .unwrap();
    }
    let pending = ctx.log_contents().await;

    let rotation = ctx.start_rotation();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Fatal error: one attempt, nothing stored, log untouched.
    assert_eq!(ctx.store.attempt_times().len(), 1);
    assert_eq!(ctx.store.object_count(), 0);
    assert_eq!(ctx.log_contents().await, pending);
    assert_eq!(ctx.log.event_count(), 3);

    ctx.store.set_fail_always(None);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(ctx.store.object_count(), 1);
    assert_eq!(ctx.log.size(), 0);
    assert_eq!(ctx.log.event_count(), 0);

    ctx.shutdown().await;
    rotation.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_back_off_exponentially() {
    let ctx = TestContext::with_options(TestOptions {
        max_retries: 4,
        retry_base_delay: Duration::from_millis(100),
        ..Default::default()
    })
    .await;
    ctx.store.fail_next(&["SlowDown", "RequestTimeout", "InternalError"]);
    ctx.log
        .append(fixtures::event(EventKind::Alarm, 1).as_bytes())
        .await
        .unwrap();

    let outcome = ctx.rotator.rotate().await.unwrap();
    assert!(matches!(outcome, RotationOutcome::Uploaded { events: 1, .. }));

    let times = ctx.store.attempt_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );

    ctx.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_keep_batch() {
    let ctx = TestContext::with_options(TestOptions {
        max_retries: 3,
        ..Default::default()
    })
    .await;
    ctx.store.set_fail_always(Some("SlowDown"));
    ctx.log
        .append(fixtures::event(EventKind::Alarm, 1).as_bytes())
        .await
        .unwrap();

    let outcome = ctx.rotator.rotate().await.unwrap();
    let RotationOutcome::Failed { error, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(error.contains("SlowDown"));
    assert_eq!(ctx.store.attempt_times().len(), 3);
    assert_eq!(ctx.log.event_count(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_malformed_batch_uploads_raw_fallback() {
    let ctx = TestContext::new().await;
    ctx.log.append(b"<EVENT><cn>1</EVENT>").await.unwrap();
    ctx.log
        .append(fixtures::event(EventKind::Alarm, 2).as_bytes())
        .await
        .unwrap();
    let raw = ctx.log_contents().await;

    let outcome = ctx.rotator.rotate().await.unwrap();
    assert!(matches!(outcome, RotationOutcome::Uploaded { fallback: true, .. }));

    let object = &ctx.store.objects()[0];
    assert!(object.key.ends_with("_raw.xml"));
    assert_eq!(object.text(), raw);
    assert!(!object.text().starts_with("<?xml"));
    assert_eq!(ctx.log.size(), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_failed_fallback_upload_keeps_log() {
    let ctx = TestContext::new().await;
    ctx.store.set_fail_always(Some("AccessDenied"));
    ctx.log.append(b"<EVENT><cn>1</EVENT>").await.unwrap();
    let raw = ctx.log_contents().await;

    let outcome = ctx.rotator.rotate().await.unwrap();
    let RotationOutcome::Failed { key, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(key.ends_with("_raw.xml"));

    assert_eq!(ctx.store.object_count(), 0);
    assert_eq!(ctx.log_contents().await, raw);
    assert_eq!(ctx.log.size(), raw.len() as u64);
    assert_eq!(ctx.log.event_count(), 1);

    ctx.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_time_trigger_counts_from_check_not_upload_end() {
    let ctx = TestContext::with_options(TestOptions {
        rotation_interval: Duration::from_secs(120),
        check_interval: Duration::from_secs(60),
        max_retries: 2,
        retry_base_delay: Duration::from_secs(50),
        ..Default::default()
    })
    .await;
    ctx.store.fail_next(&["SlowDown", "SlowDown"]);
    ctx.log
        .append(fixtures::event(EventKind::Alarm, 1).as_bytes())
        .await
        .unwrap();

    // Fires at 120s and spends 50s in backoff before giving up.
    let rotation = ctx.start_rotation();
    tokio::time::sleep(Duration::from_secs(250)).await;

    let times = ctx.store.attempt_times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[2] - times[0], Duration::from_secs(120));
    assert_eq!(ctx.store.object_count(), 1);
    assert_eq!(ctx.log.event_count(), 0);

    ctx.shutdown().await;
    rotation.await.unwrap();
}

#[tokio::test]
async fn test_bucket_probe_reports_store_errors() {
    let ctx = TestContext::new().await;
    check_bucket_access(&ctx.store).await.unwrap();

    ctx.store.set_access_error(Some("NoSuchBucket"));
    let err = check_bucket_access(&ctx.store).await.unwrap_err();
    assert_eq!(err.code, "NoSuchBucket");
    assert!(guidance(&err.code).contains("BUCKET_NAME"));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_json_output_converts_records() {
    let ctx = TestContext::with_options(TestOptions {
        output_format: OutputFormat::Json,
        ..Default::default()
    })
    .await;
    for record in fixtures::events(3) {
        ctx.log.append(record.as_bytes()).await.unwrap();
    }

    let outcome = ctx.rotator.rotate().await.unwrap();
    assert!(matches!(outcome, RotationOutcome::Uploaded { records: Some(3), .. }));

    let object = &ctx.store.objects()[0];
    assert!(object.key.ends_with(".json"));
    assert_eq!(object.attributes.content_type, "application/json");
    assert_eq!(object.attributes.source, "xml-stream-aggregator");

    let parsed: serde_json::Value = serde_json::from_slice(&object.body).unwrap();
    let records = parsed.as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["plasectrxEventname"], "Input point in alarm");
    assert_eq!(records[1]["plasectrxEventname"], "Access granted");
    assert_eq!(records[1]["plasectrxSourcelocation"], "");
    assert_eq!(records[2]["plasectrxIsAlarm"], "0");

    assert!(!ctx.staging_path().exists());
    assert!(!ctx.staging_path().with_extension("json").exists());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_tcp_to_store() {
    let ctx = TestContext::new().await;
    let records = fixtures::events(5);
    let payload: String = records.iter().map(|r| fixtures::with_declaration(r)).collect();

    ctx.send(payload.as_bytes()).await;
    ctx.wait_for_events(5).await;

    let outcome = ctx.rotator.rotate().await.unwrap();
    assert!(matches!(
        outcome,
        RotationOutcome::Uploaded { events: 5, records: Some(5), fallback: false, .. }
    ));

    let body = ctx.store.objects()[0].text().to_string();
    assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<EVENTS>\n"));
    assert_eq!(body.matches("<?xml").count(), 1);
    for record in &records {
        assert!(body.contains(record.as_str()));
    }

    assert_eq!(ctx.log.event_count(), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_empty_log_skips_upload() {
    let ctx = TestContext::new().await;
    assert_eq!(ctx.rotator.rotate().await.unwrap(), RotationOutcome::Skipped);
    assert_eq!(ctx.store.attempt_times().len(), 0);
    ctx.shutdown().await;
}
