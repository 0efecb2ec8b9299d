//! End-to-end tests driving the real server over TCP.

use axum::http::header::{AUTHORIZATION, SET_COOKIE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;

use filter_gateway::config::{GatewayConfig, RouteConfig};

mod common;

#[tokio::test]
async fn test_proxies_with_prefix_and_transaction_id() {
    let (upstream, seen) = common::start_echo_upstream().await;
    let mut config = GatewayConfig::default();
    config.routes.push(RouteConfig {
        name: "api".into(),
        host: None,
        path_prefix: Some("/api".into()),
        upstream: format!("http://{}/v1", upstream),
        priority: 10,
    });
    let gateway = common::start_gateway(config).await;

    let res = common::client()
        .post(gateway.url("/api/items?limit=2"))
        .header("x-transaction-id", "abc-123")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].uri.path(), "/v1/api/items");
    assert_eq!(seen[0].uri.query(), Some("limit=2"));
    assert_eq!(seen[0].header("x-transaction-id").as_deref(), Some("abc-123/0"));
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let (upstream, seen) = common::start_echo_upstream().await;
    let mut config = GatewayConfig::default();
    let mut route = common::route_to(upstream);
    route.path_prefix = Some("/only".into());
    config.routes.push(route);
    let gateway = common::start_gateway(config).await;

    let res = common::client().get(gateway.url("/elsewhere")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_upstream_is_502() {
    let mut config = GatewayConfig::default();
    config.routes.push(RouteConfig {
        name: "dead".into(),
        host: None,
        path_prefix: None,
        upstream: "http://127.0.0.1:1".into(),
        priority: 0,
    });
    let gateway = common::start_gateway(config).await;

    let res = common::client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn test_throttle_answers_429_with_retry_after() {
    let (upstream, seen) = common::start_echo_upstream().await;
    let mut config = GatewayConfig::default();
    config.routes.push(common::route_to(upstream));
    config.throttle.enabled = true;
    config.throttle.requests = 2;
    config.throttle.duration_ms = 60_000;
    let gateway = common::start_gateway(config).await;

    let client = common::client();
    let mut statuses = Vec::new();
    let mut retry_after = None;
    for _ in 0..3 {
        let res = client.get(gateway.url("/")).send().await.unwrap();
        statuses.push(res.status().as_u16());
        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            retry_after = res
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
        }
    }

    assert_eq!(statuses, vec![200, 200, 429]);
    let retry_after = retry_after.unwrap();
    assert!((1..=30).contains(&retry_after));
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_managed_cookie_stays_in_session() {
    let (upstream, seen) = common::start_upstream(|_, count| {
        let mut response = (StatusCode::OK, "ok").into_response();
        if count == 0 {
            response
                .headers_mut()
                .append(SET_COOKIE, HeaderValue::from_static("JSESSIONID=upstream-1; Path=/"));
            response
                .headers_mut()
                .append(SET_COOKIE, HeaderValue::from_static("theme=dark; Path=/"));
        }
        response
    })
    .await;

    let mut config = GatewayConfig::default();
    config.routes.push(common::route_to(upstream));
    config.cookies.enabled = true;
    config.cookies.managed = vec!["JSESSIONID".into()];
    config.cookies.relayed = vec!["theme".into()];
    let gateway = common::start_gateway(config).await;

    let client = common::client();
    let first = client.get(gateway.url("/app")).send().await.unwrap();
    assert!(common::set_cookie_pair(&first, "JSESSIONID").is_none());
    assert_eq!(common::set_cookie_pair(&first, "theme").as_deref(), Some("theme=dark"));
    let session = common::set_cookie_pair(&first, "GATEWAY_SESSION").unwrap();

    client
        .get(gateway.url("/app"))
        .header("cookie", format!("{}; theme=dark; tracker=1", session))
        .send()
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let forwarded = seen[1].header("cookie").unwrap();
    assert!(forwarded.contains("theme=dark"));
    assert!(forwarded.contains("JSESSIONID=upstream-1"));
    assert!(!forwarded.contains("tracker"));
    assert!(!forwarded.contains("GATEWAY_SESSION"));
}

#[tokio::test]
async fn test_basic_auth_retries_and_caches_in_session() {
    let (upstream, seen) = common::start_upstream(|recorded, _| {
        if recorded.header("authorization").as_deref() == Some("Basic dXNlcjpwYXNz") {
            (StatusCode::OK, "secret").into_response()
        } else {
            let mut response = StatusCode::UNAUTHORIZED.into_response();
            response
                .headers_mut()
                .insert("www-authenticate", HeaderValue::from_static("Basic realm=\"up\""));
            response
        }
    })
    .await;

    let mut config = GatewayConfig::default();
    config.routes.push(common::route_to(upstream));
    config.basic_auth.enabled = true;
    config.basic_auth.username = "user".into();
    config.basic_auth.password = "pass".into();
    let gateway = common::start_gateway(config).await;

    let client = common::client();
    let first = client
        .post(gateway.url("/data"))
        .header(AUTHORIZATION, "Basic Y2xpZW50OnNpZGU=")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    assert!(first.headers().get("www-authenticate").is_none());
    let session = common::set_cookie_pair(&first, "GATEWAY_SESSION").unwrap();
    assert_eq!(first.text().await.unwrap(), "secret");

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].header("authorization"), None);
        assert_eq!(seen[1].body, "payload");
    }

    let second = client
        .get(gateway.url("/data"))
        .header("cookie", session)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(seen.lock().unwrap().len(), 3);
}
