//! End-to-end tests of upgrade proxying.

use futures::{SinkExt, StreamExt};
use gateway_proxy::config::{GatewayConfig, ProxyPolicyConfig, ServiceEndpointConfig};
use tokio_tungstenite::tungstenite::Message;

mod common;

fn ws_config(urls: Vec<String>, ws: bool) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config
        .service_endpoints
        .insert("chat".into(), ServiceEndpointConfig::balanced(urls));
    let mut proxy = ProxyPolicyConfig::new("chat");
    proxy.ws = ws;
    config.routes.push(common::route("chat", None, proxy));
    config
}

#[tokio::test]
async fn websocket_echo_through_gateway() {
    let backend = common::start_ws_echo_backend().await;
    let gateway = common::start_gateway(ws_config(vec![format!("ws://{}", backend)], true)).await;

    let (mut ws, response) = tokio_tungstenite::connect_async(gateway.ws_url("/socket"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    for text in ["hello", "world"] {
        ws.send(Message::text(text)).await.unwrap();
        let echoed = ws.next().await.unwrap().unwrap();
        assert_eq!(echoed, Message::text(text));
    }
    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn concurrent_upgrades_do_not_cross_talk() {
    let backend = common::start_ws_echo_backend().await;
    let gateway = common::start_gateway(ws_config(vec![format!("ws://{}", backend)], true)).await;

    let mut tasks = Vec::new();
    for i in 0..5 {
        let url = gateway.ws_url("/socket");
        tasks.push(tokio::spawn(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
            let text = format!("client-{}", i);
            ws.send(Message::text(text.clone())).await.unwrap();
            let echoed = ws.next().await.unwrap().unwrap();
            assert_eq!(echoed, Message::text(text));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn upgrade_to_dead_backend_drops_connection() {
    let dead = common::dead_addr().await;
    let gateway = common::start_gateway(ws_config(vec![format!("http://{}", dead)], true)).await;

    assert!(tokio_tungstenite::connect_async(gateway.ws_url("/socket")).await.is_err());

    // The gateway keeps serving.
    let res = common::client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
}

const UPGRADE_REQUEST: &str = "GET /socket HTTP/1.1\r\n\
    Host: gateway.test\r\n\
    Connection: Upgrade\r\n\
    Upgrade: websocket\r\n\
    Sec-WebSocket-Version: 13\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

#[tokio::test]
async fn upgrade_without_ws_policy_is_served_as_plain_request() {
    let backend = common::start_mock_backend("plain-ok").await;
    let gateway = common::start_gateway(ws_config(vec![format!("http://{}", backend)], false)).await;

    match tokio_tungstenite::connect_async(gateway.ws_url("/socket")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 200);
        }
        other => panic!("expected a plain 200, got {:?}", other.map(|(_, r)| r.status())),
    }

    let answer = common::raw_exchange(gateway.addr, UPGRADE_REQUEST, "plain-ok").await;
    assert!(answer.starts_with("HTTP/1.1 200"), "{}", answer);
    assert!(answer.ends_with("plain-ok"), "{}", answer);
}

#[tokio::test]
async fn refused_upgrade_status_is_relayed() {
    let backend =
        common::start_programmable_backend(|_| async { (403, "forbidden-body".to_string()) }).await;
    let gateway = common::start_gateway(ws_config(vec![format!("http://{}", backend)], true)).await;

    match tokio_tungstenite::connect_async(gateway.ws_url("/socket")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("expected HTTP 403, got {:?}", other.map(|(_, r)| r.status())),
    }

    let answer = common::raw_exchange(gateway.addr, UPGRADE_REQUEST, "forbidden-body").await;
    assert!(answer.starts_with("HTTP/1.1 403"), "{}", answer);
    assert!(answer.to_ascii_lowercase().contains("content-length: 14\r\n"), "{}", answer);
    assert!(answer.ends_with("\r\n\r\nforbidden-body"), "{}", answer);
}
