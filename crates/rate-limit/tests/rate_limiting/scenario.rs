use std::collections::BTreeMap;

use indoc::indoc;
use serde_json::json;

use crate::manager;

#[tokio::test]
async fn free_tier_sixth_request_is_denied() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true
        default_tier = "free"

        [rate_limits.tiers.free]
        requests_per_minute = 5
    "#};

    let (manager, _) = manager(config);
    let limits = manager.tiers().create_default_limits("free");

    let mut results = Vec::new();

    for i in 1..=6 {
        let result = manager.attempt("ip:1.2.3.4", &limits, 1).await.unwrap();

        results.push(json!({
            "allowed": result.allowed,
            "remaining": result.remaining,
            "request": i,
            "retry_after": result.retry_after,
        }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "allowed": true,
        "remaining": 4,
        "request": 1,
        "retry_after": null
      },
      {
        "allowed": true,
        "remaining": 3,
        "request": 2,
        "retry_after": null
      },
      {
        "allowed": true,
        "remaining": 2,
        "request": 3,
        "retry_after": null
      },
      {
        "allowed": true,
        "remaining": 1,
        "request": 4,
        "retry_after": null
      },
      {
        "allowed": true,
        "remaining": 0,
        "request": 5,
        "retry_after": null
      },
      {
        "allowed": false,
        "remaining": 0,
        "request": 6,
        "retry_after": 60
      }
    ]
    "#);
}

#[tokio::test]
async fn denied_request_renders_a_429() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true
        default_tier = "free"

        [rate_limits.tiers.free]
        requests_per_minute = 1
    "#};

    let (manager, _) = manager(config);
    let (limits, cost) = manager.limits_for("free", None);

    manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap();
    let result = manager.attempt("ip:1.2.3.4", &limits, cost).await.unwrap();

    let response = result.into_response().unwrap();

    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap().to_string()))
        .collect();

    let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();

    insta::assert_json_snapshot!(json!({
        "body": body,
        "headers": headers,
        "status": response.status().as_u16(),
    }), @r#"
    {
      "body": {
        "error": {
          "code": "RATE_LIMIT_EXCEEDED",
          "message": "Too many requests, retry after 60 seconds",
          "retry_after": 60
        },
        "success": false
      },
      "headers": {
        "content-type": "application/json",
        "retry-after": "60",
        "x-ratelimit-limit": "1",
        "x-ratelimit-remaining": "0",
        "x-ratelimit-reset": "1700000060"
      },
      "status": 429
    }
    "#);
}

#[tokio::test]
async fn route_cost_and_overrides_from_configuration() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = true
        default_tier = "free"

        [rate_limits.tiers.free]
        requests_per_minute = 100

        [rate_limits.routes."POST /upload"]
        cost = 3
        limits = [{ attempts = 10, decay_seconds = 60, algorithm = "fixed", by = "user" }]
    "#};

    let (manager, _) = manager(config);
    let (limits, cost) = manager.limits_for("free", Some("POST /upload"));

    let request = rate_limit::RateLimitRequest::builder()
        .ip_str("1.2.3.4")
        .unwrap()
        .user("alice")
        .build();

    let mut results = Vec::new();

    for i in 1..=4 {
        let result = manager.attempt_request(&request, &limits, cost).await.unwrap();

        results.push(json!({
            "allowed": result.allowed,
            "limit": result.limit,
            "remaining": result.remaining,
            "request": i,
        }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "allowed": true,
        "limit": 10,
        "remaining": 7,
        "request": 1
      },
      {
        "allowed": true,
        "limit": 10,
        "remaining": 4,
        "request": 2
      },
      {
        "allowed": true,
        "limit": 10,
        "remaining": 1,
        "request": 3
      },
      {
        "allowed": false,
        "limit": 10,
        "remaining": 0,
        "request": 4
      }
    ]
    "#);
}
