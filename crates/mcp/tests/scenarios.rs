// End-to-end routing scenarios through the host facade

use mcphub_core::connection::ServerConnection;
use mcphub_core::events::EventType;
use mcphub_core::{CapabilityDescriptor, ClientId, HostError, ServerId};
use mcphub_mcp::upstream::{json_schema_object, json_schema_string};
use mcphub_mcp::{handler_fn, Host, HostSettings, LocalServer, RouteOutcome, RouterConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn say_descriptor() -> CapabilityDescriptor {
    CapabilityDescriptor::tool(
        "say",
        json_schema_object(json!({"input": json_schema_string("Text to echo")}), vec!["input"]),
    )
    .with_output_schema(json_schema_object(
        json!({"output": json_schema_string("Echoed text")}),
        vec!["output"],
    ))
}

fn echo_server() -> Arc<dyn ServerConnection> {
    Arc::new(LocalServer::new().with(handler_fn(say_descriptor(), |params: Value| async move {
        Ok(json!({"output": params["input"].clone()}))
    })))
}

async fn echo_host() -> Host {
    let host = Host::default();
    host.register_server(ServerId::new("echo-srv"), vec![say_descriptor()], echo_server())
        .await
        .unwrap();
    host.register_client(ClientId::new("c1")).await.unwrap();
    host
}

fn say_request() -> Value {
    json!({"jsonrpc": "2.0", "id": "1", "method": "echo-srv.say", "params": {"input": "hi"}})
}

fn response_of(outcome: RouteOutcome) -> Value {
    outcome.into_response().expect("response delivered").to_value()
}

#[tokio::test]
async fn scenario_a_consented_call_echoes() {
    let host = echo_host().await;
    let c1 = ClientId::new("c1");
    host.grant_consent(c1.clone(), ServerId::new("echo-srv"), "say", "user")
        .await
        .unwrap();

    let response = response_of(host.call(&c1, say_request()).await);
    assert_eq!(
        response,
        json!({"jsonrpc": "2.0", "id": "1", "result": {"output": "hi"}})
    );

    let context = host.context(&c1).await.unwrap();
    assert_eq!(context.history.len(), 1);
    assert_eq!(context.history[0].request, say_request());
}

#[tokio::test]
async fn scenario_b_without_consent_is_denied() {
    let host = echo_host().await;

    let response = response_of(host.call(&ClientId::new("c1"), say_request()).await);
    assert_eq!(response["id"], "1");
    assert_eq!(response["error"]["code"], HostError::CONSENT_DENIED);
    assert!(response.get("result").is_none());
}

#[tokio::test]
async fn scenario_c_unknown_server_leaves_registry_untouched() {
    let host = echo_host().await;
    let before: Vec<_> = host.list_servers().await.iter().map(|s| s.id.clone()).collect();

    let request = json!({"jsonrpc": "2.0", "id": "1", "method": "unknown-srv.say", "params": {"input": "hi"}});
    let response = response_of(host.call(&ClientId::new("c1"), request).await);
    assert_eq!(response["error"]["code"], HostError::UNKNOWN_SERVER);

    let after: Vec<_> = host.list_servers().await.iter().map(|s| s.id.clone()).collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn scenario_d_revoked_consent_is_denied() {
    let host = echo_host().await;
    let c1 = ClientId::new("c1");
    let record = host
        .grant_consent(c1.clone(), ServerId::new("echo-srv"), "say", "user")
        .await
        .unwrap();
    host.revoke_consent(&record.consent_id).await.unwrap();

    let response = response_of(host.call(&c1, say_request()).await);
    assert_eq!(response["error"]["code"], HostError::CONSENT_DENIED);

    // A fresh grant lifts the block
    host.grant_consent(c1.clone(), ServerId::new("echo-srv"), "say", "user")
        .await
        .unwrap();
    let response = response_of(host.call(&c1, say_request()).await);
    assert_eq!(response["result"]["output"], "hi");
}

#[tokio::test]
async fn conflicting_reregistration_is_rejected() {
    let host = echo_host().await;
    let conflicting = CapabilityDescriptor::tool(
        "say",
        json_schema_object(json!({"text": json_schema_string("Other field")}), vec!["text"]),
    );

    let err = host
        .register_server(ServerId::new("echo-srv"), vec![conflicting], echo_server())
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::DuplicateId(_)));

    // The original declaration still routes
    let c1 = ClientId::new("c1");
    host.grant_consent(c1.clone(), ServerId::new("echo-srv"), "say", "user")
        .await
        .unwrap();
    let response = response_of(host.call(&c1, say_request()).await);
    assert_eq!(response["result"]["output"], "hi");
}

#[tokio::test]
async fn unsupported_capability_kind_is_rejected() {
    let host = Host::default();
    let mut descriptor = say_descriptor();
    descriptor.kind = "prompt".to_string();

    let err = host
        .register_server(ServerId::new("odd"), vec![descriptor], echo_server())
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::InvalidCapability(_)));
    assert!(host.list_servers().await.is_empty());
}

#[tokio::test]
async fn unregistered_client_starts_over() {
    let host = echo_host().await;
    let c1 = ClientId::new("c1");
    host.grant_consent(c1.clone(), ServerId::new("echo-srv"), "say", "user")
        .await
        .unwrap();
    host.call(&c1, say_request()).await;

    host.unregister_client(&c1).await;
    // Unregistering twice is a no-op
    assert!(!host.unregister_client(&c1).await);

    host.register_client(c1.clone()).await.unwrap();
    assert!(host.context(&c1).await.unwrap().history.is_empty());
    // Consent survives re-registration of the same client id
    let response = response_of(host.call(&c1, say_request()).await);
    assert_eq!(response["result"]["output"], "hi");
}

#[tokio::test(start_paused = true)]
async fn slow_server_times_out_without_blocking_others() {
    let settings = HostSettings {
        router: RouterConfig {
            default_timeout: Duration::from_millis(200),
            ..RouterConfig::default()
        },
        ..HostSettings::default()
    };
    let host = Arc::new(Host::new(settings));

    let slow = LocalServer::new().with(handler_fn(say_descriptor(), |_| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    }));
    host.register_server(ServerId::new("slow"), vec![say_descriptor()], Arc::new(slow))
        .await
        .unwrap();
    host.register_server(ServerId::new("echo-srv"), vec![say_descriptor()], echo_server())
        .await
        .unwrap();

    let c1 = ClientId::new("c1");
    host.register_client(c1.clone()).await.unwrap();
    for server in ["slow", "echo-srv"] {
        host.grant_consent(c1.clone(), ServerId::new(server), "say", "user")
            .await
            .unwrap();
    }

    let slow_call = {
        let host = host.clone();
        let c1 = c1.clone();
        tokio::spawn(async move {
            host.call(
                &c1,
                json!({"jsonrpc": "2.0", "id": "slow", "method": "slow.say", "params": {"input": "x"}}),
            )
            .await
        })
    };

    let fast = response_of(host.call(&c1, say_request()).await);
    assert_eq!(fast["result"]["output"], "hi");

    let slow = response_of(slow_call.await.unwrap());
    assert_eq!(slow["id"], "slow");
    assert_eq!(slow["error"]["code"], HostError::UPSTREAM_TIMEOUT);
}

#[tokio::test]
async fn events_follow_the_lifecycle() {
    let host = Host::default();
    let mut events = host.subscribe_events();

    host.register_server(ServerId::new("echo-srv"), vec![say_descriptor()], echo_server())
        .await
        .unwrap();
    host.register_client(ClientId::new("c1")).await.unwrap();
    let record = host
        .grant_consent(ClientId::new("c1"), ServerId::new("echo-srv"), "say", "user")
        .await
        .unwrap();
    host.call(&ClientId::new("c1"), say_request()).await;
    host.revoke_consent(&record.consent_id).await.unwrap();
    host.unregister_server(&ServerId::new("echo-srv")).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event.event_type {
            EventType::ServerRegistered { .. } => "server_registered",
            EventType::ClientRegistered { .. } => "client_registered",
            EventType::ConsentGranted { .. } => "consent_granted",
            EventType::RequestCompleted { success: true, .. } => "request_completed",
            EventType::ConsentRevoked { .. } => "consent_revoked",
            EventType::ServerUnregistered { .. } => "server_unregistered",
            _ => "other",
        });
    }

    assert_eq!(
        kinds,
        vec![
            "server_registered",
            "client_registered",
            "consent_granted",
            "request_completed",
            "consent_revoked",
            "server_unregistered",
        ]
    );
}
