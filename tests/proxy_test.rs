//! End-to-end tests of plain request proxying.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::StatusCode;
use gateway_proxy::config::{GatewayConfig, ProxyPolicyConfig, ServiceEndpointConfig};

mod common;

fn config_with(endpoint: ServiceEndpointConfig, proxy: ProxyPolicyConfig) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config
        .service_endpoints
        .insert(proxy.service_endpoint.clone(), endpoint);
    config.routes.push(common::route("default", None, proxy));
    config
}

#[tokio::test]
async fn round_robin_alternates_between_backends() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let config = config_with(
        ServiceEndpointConfig::balanced([format!("http://{}", a), format!("http://{}", b)]),
        ProxyPolicyConfig::new("api"),
    );
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let res = client.get(gateway.url("/")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        bodies.push(res.text().await.unwrap());
    }

    assert_eq!(bodies, ["a", "b", "a", "b"]);
}

#[tokio::test]
async fn single_url_receives_every_request() {
    let only = common::start_mock_backend("only").await;
    let config = config_with(
        ServiceEndpointConfig::single(format!("http://{}", only)),
        ProxyPolicyConfig::new("single"),
    );
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    for _ in 0..3 {
        let body = client.get(gateway.url("/x")).send().await.unwrap().text().await.unwrap();
        assert_eq!(body, "only");
    }
}

#[tokio::test]
async fn h2c_upgrade_request_is_proxied_as_plain_request() {
    let backend = common::start_mock_backend("plain-ok").await;
    let config = config_with(
        ServiceEndpointConfig::single(format!("http://{}", backend)),
        ProxyPolicyConfig::new("api"),
    );
    let gateway = common::start_gateway(config).await;

    let request = "GET / HTTP/1.1\r\n\
        Host: gateway.test\r\n\
        Connection: Upgrade, HTTP2-Settings\r\n\
        Upgrade: h2c\r\n\
        HTTP2-Settings: AAMAAABkAARAAAAAAAIAAAAA\r\n\r\n";
    let answer = common::raw_exchange(gateway.addr, request, "plain-ok").await;

    assert!(answer.starts_with("HTTP/1.1 200"), "{}", answer);
    assert!(answer.ends_with("plain-ok"), "{}", answer);
}

#[tokio::test]
async fn dead_backend_yields_bad_gateway() {
    let dead = common::dead_addr().await;
    let config = config_with(
        ServiceEndpointConfig::single(format!("http://{}", dead)),
        ProxyPolicyConfig::new("dead"),
    );
    let gateway = common::start_gateway(config).await;

    let res = common::client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(res.text().await.unwrap(), "Bad gateway.");
}

#[tokio::test]
async fn one_dead_backend_does_not_affect_the_other() {
    let alive = common::start_mock_backend("alive").await;
    let dead = common::dead_addr().await;
    let config = config_with(
        ServiceEndpointConfig::balanced([format!("http://{}", alive), format!("http://{}", dead)]),
        ProxyPolicyConfig::new("api"),
    );
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let statuses: Vec<u16> = {
        let mut out = Vec::new();
        for _ in 0..4 {
            out.push(client.get(gateway.url("/")).send().await.unwrap().status().as_u16());
        }
        out
    };

    // No retry against the next backend: every second pick fails.
    assert_eq!(statuses, [200, 502, 200, 502]);
}

#[tokio::test]
async fn unmatched_request_is_not_found() {
    let backend = common::start_mock_backend("api").await;
    let mut config = GatewayConfig::default();
    config
        .service_endpoints
        .insert("api".into(), ServiceEndpointConfig::single(format!("http://{}", backend)));
    config
        .routes
        .push(common::route("api", Some("/api"), ProxyPolicyConfig::new("api")));
    let gateway = common::start_gateway(config).await;

    let res = common::client().get(gateway.url("/other")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forwarding_options_shape_the_backend_request() {
    let backend = common::start_echo_backend().await;
    let mut proxy = ProxyPolicyConfig::new("echo");
    proxy.change_origin = true;
    proxy.xfwd = true;
    proxy.path_rewrite.insert("/api".into(), "".into());
    let config = config_with(ServiceEndpointConfig::single(format!("http://{}", backend)), proxy);
    let gateway = common::start_gateway(config).await;

    let res = common::client()
        .get(gateway.url("/api/items?page=2"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers().get("x-request-id").unwrap(), "req-123");

    let body = res.text().await.unwrap();
    let mut lines = body.lines();
    assert_eq!(lines.next().unwrap(), "GET /items?page=2 HTTP/1.1");
    let headers: HashMap<&str, &str> = lines.filter_map(|l| l.split_once(": ")).collect();

    assert_eq!(headers["host"], backend.to_string());
    assert_eq!(headers["x-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["x-forwarded-host"], gateway.addr.to_string());
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["x-request-id"], "req-123");
}

#[tokio::test]
async fn request_id_is_generated_when_missing() {
    let backend = common::start_mock_backend("ok").await;
    let config = config_with(
        ServiceEndpointConfig::single(format!("http://{}", backend)),
        ProxyPolicyConfig::new("api"),
    );
    let gateway = common::start_gateway(config).await;

    let res = common::client().get(gateway.url("/")).send().await.unwrap();
    let id = res.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn reload_swaps_targets_and_rejects_broken_configs() {
    let old = common::start_mock_backend("old").await;
    let new = common::start_mock_backend("new").await;
    let config = config_with(
        ServiceEndpointConfig::single(format!("http://{}", old)),
        ProxyPolicyConfig::new("api"),
    );
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    assert_eq!(client.get(gateway.url("/")).send().await.unwrap().text().await.unwrap(), "old");

    // Unknown endpoint: rejected, current routes stay active.
    let broken = config_with(
        ServiceEndpointConfig::single(format!("http://{}", new)),
        ProxyPolicyConfig::new("api"),
    );
    let mut broken = broken;
    broken.routes[0].proxy.service_endpoint = "missing".into();
    gateway.config_updates.send(broken).unwrap();

    let swapped = config_with(
        ServiceEndpointConfig::single(format!("http://{}", new)),
        ProxyPolicyConfig::new("api"),
    );
    gateway.config_updates.send(swapped).unwrap();

    let mut body = String::new();
    for _ in 0..50 {
        body = client.get(gateway.url("/")).send().await.unwrap().text().await.unwrap();
        if body == "new" {
            break;
        }
        assert_eq!(body, "old");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(body, "new");
}
