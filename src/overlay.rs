//! Startup self-registration with a configured parent, and a periodic
//! heartbeat thereafter so the parent's staleness sweep never trips on a
//! healthy child. Both use the same delegation HTTP client the scheduler
//! uses to reach other nodes.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::delegation::DelegationClient;
use crate::model::{NodeCapacity, NodeRole, Quantity};
use crate::registry::Registry;

#[derive(Debug, Deserialize)]
struct ParentNodeInfo {
    node_id: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    parent_node: ParentNodeInfo,
}

/// Registers with the configured parent, if any, then spawns a
/// long-lived heartbeat loop. Returns a token the caller can cancel on
/// shutdown; a no-op token is returned when no parent is configured.
pub async fn bootstrap(
    config: &AgentConfig,
    registry: &Arc<Registry>,
    delegation: &DelegationClient,
) -> CancellationToken {
    let token = CancellationToken::new();
    let Some(parent_address) = config.agent.parent_address.clone() else {
        return token;
    };

    let local = registry.get_local();
    let register_body = serde_json::json!({ "node_id": local.node_id, "capacity": local });
    let register_url = format!("{}/api/register", parent_address.trim_end_matches('/'));
    match delegation
        .post_json_response::<_, RegisterResponse>(&register_url, &register_body)
        .await
    {
        Ok(response) => {
            info!(parent = %parent_address, parent_node_id = %response.parent_node.node_id, "registered with parent");
            registry.set_parent(
                NodeCapacity::new(response.parent_node.node_id, NodeRole::Parent, Quantity::ZERO)
                    .with_address(response.parent_node.address),
            );
        }
        Err(error) => warn!(parent = %parent_address, %error, "failed to register with parent at startup"),
    }

    registry.set_change_callback(change_callback(Arc::clone(registry), delegation.clone(), parent_address.clone()));

    let registry = Arc::clone(registry);
    let delegation = delegation.clone();
    let heartbeat_period = config.agent.heartbeat;
    let child_token = token.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_period);
        loop {
            tokio::select! {
                _ = child_token.cancelled() => break,
                _ = ticker.tick() => send_heartbeat(&registry, &delegation, &parent_address).await,
            }
        }
    });

    token
}

async fn send_heartbeat(registry: &Registry, delegation: &DelegationClient, parent_address: &str) {
    let local = registry.get_local();
    let heartbeat_url = format!("{}/api/heartbeat", parent_address.trim_end_matches('/'));
    let body = serde_json::json!({ "node_id": local.node_id, "capacity": local });
    if let Err(error) = delegation.post_json(&heartbeat_url, &body).await {
        warn!(parent = %parent_address, %error, "heartbeat to parent failed");
    }
}

/// Wires the registry's resource-change callback to an immediate,
/// out-of-band heartbeat so the parent's mirrored view is refreshed as
/// soon as local capacity changes, rather than waiting out the periodic
/// ticker (spec §9: "wire it to an outbound heartbeat POST").
fn change_callback(
    registry: Arc<Registry>,
    delegation: DelegationClient,
    parent_address: String,
) -> crate::registry::ChangeCallback {
    Arc::new(move || {
        let registry = Arc::clone(&registry);
        let delegation = delegation.clone();
        let parent_address = parent_address.clone();
        Box::pin(async move {
            send_heartbeat(&registry, &delegation, &parent_address).await;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quantity::Quantity;
    use crate::registry::RegistryConfig;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn no_parent_configured_returns_immediately_with_no_background_task() {
        let registry = Registry::new(
            "local",
            Quantity::new(1000, 0, 0, 0),
            RegistryConfig {
                staleness_sweep_period: Duration::from_secs(30),
                staleness_multiplier: 3,
                heartbeat_period: Duration::from_secs(30),
            },
            None,
        );
        let config = AgentConfig::default();
        let delegation = DelegationClient::new(&config.http_client).unwrap();
        let token = bootstrap(&config, &registry, &delegation).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn configured_parent_is_registered_with_on_startup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "parent_node": {"node_id": "parent-1", "address": "http://parent.example:7700"}
            })))
            .mount(&server)
            .await;

        let registry = Registry::new(
            "local",
            Quantity::new(1000, 0, 0, 0),
            RegistryConfig {
                staleness_sweep_period: Duration::from_secs(30),
                staleness_multiplier: 3,
                heartbeat_period: Duration::from_secs(30),
            },
            None,
        );
        let mut config = AgentConfig::default();
        config.agent.parent_address = Some(server.uri());
        let delegation = DelegationClient::new(&config.http_client).unwrap();
        let token = bootstrap(&config, &registry, &delegation).await;
        let parent = registry.get_parent().expect("parent must be recorded after registration");
        assert_eq!(parent.node_id, "parent-1");
        assert_eq!(parent.address.as_deref(), Some("http://parent.example:7700"));
        token.cancel();
    }

    /// Spec §9: the resource-change callback fires an out-of-band
    /// heartbeat immediately, rather than waiting for the periodic tick.
    #[tokio::test]
    async fn local_allocation_triggers_an_immediate_heartbeat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "parent_node": {"node_id": "parent-1", "address": "http://parent.example:7700"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/heartbeat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"acknowledged": "local"})))
            .mount(&server)
            .await;

        let registry = Registry::new(
            "local",
            Quantity::new(1000, 0, 0, 0),
            RegistryConfig {
                staleness_sweep_period: Duration::from_secs(30),
                staleness_multiplier: 3,
                heartbeat_period: Duration::from_secs(3600),
            },
            None,
        );
        let mut config = AgentConfig::default();
        config.agent.heartbeat = Duration::from_secs(3600);
        config.agent.parent_address = Some(server.uri());
        let delegation = DelegationClient::new(&config.http_client).unwrap();
        let token = bootstrap(&config, &registry, &delegation).await;

        registry.allocate("w1", Quantity::new(100, 0, 0, 0)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let requests = server.received_requests().await.unwrap();
        assert!(
            requests.iter().any(|r| r.url.path() == "/api/heartbeat"),
            "allocate() must trigger an immediate heartbeat via the change callback, not just the periodic ticker"
        );
        token.cancel();
    }
}
