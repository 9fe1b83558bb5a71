//! The HTTP trends client plugged into the merger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use flowpulse_common::{EvidenceRecord, Metric, Platform, TrendAnchor, TrendOrigin, TrendParams};
use flowpulse_engine::{SnapshotBuilder, TrendMerger};
use serde_json::json;
use trends_client::TrendsClient;

async fn interest(Query(params): Query<HashMap<String, String>>) -> Response {
    match params.get("geo").map(String::as_str) {
        Some("IN") => StatusCode::TOO_MANY_REQUESTS.into_response(),
        _ => Json(json!({
            "points": (0..60).map(|d| json!({"period": format!("d{d:02}"), "value": if d < 30 { 20 } else { 30 }})).collect::<Vec<_>>(),
            "anchor_average": 50.0
        }))
        .into_response(),
    }
}

async fn fake_trends() -> String {
    let app = Router::new().route("/interest", get(interest));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn live_us_series_and_rate_limited_india_fallback() {
    let base = fake_trends().await;
    let client = TrendsClient::new(base, None, Duration::from_secs(2)).unwrap();
    let params = TrendParams {
        anchor: Some(TrendAnchor {
            keyword: "zapier".to_string(),
            monthly_volume: 10_000,
        }),
        max_attempts: 2,
        retry_base: Duration::ZERO,
        ..TrendParams::default()
    };
    let builder = SnapshotBuilder::builder()
        .trends(TrendMerger::new(Arc::new(client), params))
        .build();

    let record = EvidenceRecord {
        platform: Platform::YouTube,
        external_id: "yt-1".to_string(),
        raw_title: "Slack bot".to_string(),
        url: "https://youtube.com/watch?v=yt-1".to_string(),
        metrics: [(Metric::Views, 100)].into(),
        country: Some("US".to_string()),
        collected_at: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
    };
    let (snapshot, stats) = builder.build(vec![record], None).await.unwrap();
    let workflow = &snapshot.workflows[0];

    let us = &workflow.trends["US"];
    assert_eq!(us.origin, TrendOrigin::Live);
    assert_eq!(us.points.len(), 60);
    assert!((us.growth_pct_30d - 0.5).abs() < 1e-12);
    assert_eq!(us.monthly_search_estimate, Some(6_000));

    let india = &workflow.trends["IN"];
    assert_eq!(india.origin, TrendOrigin::Synthesized);
    assert_eq!(india.fallback_reason.as_deref(), Some("rate limited"));
    assert_eq!(stats.live_trends, 1);
    assert_eq!(stats.synthesized_trends, 1);
}
