// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::time::Duration;

use serde_json::json;

use ro_core::models::{DeployOptions, TaskDefinitionDocument};
use ro_core::services::memory_gateway::{GatewayCall, InMemoryGateway};

pub const CLUSTER: &str = "c";
pub const SERVICE: &str = "svc";

/// A one-container definition for `family`.
pub fn document(family: &str) -> TaskDefinitionDocument {
    TaskDefinitionDocument::from_value(json!({
        "family": family,
        "cpu": "256",
        "memory": "512",
        "containerDefinitions": [{"name": "app", "image": format!("{family}:latest")}]
    }))
    .unwrap()
}

/// 60s budget at the default 15s service interval: five polls.
pub fn options() -> DeployOptions {
    DeployOptions::default().with_timeout(Duration::from_secs(60))
}

/// A gateway already running `svc` on revision 1 of `family`.
pub fn running_service(family: &str) -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    gateway.seed_definition(&document(family)).unwrap();
    gateway
        .seed_service(CLUSTER, SERVICE, &format!("{family}:1"))
        .unwrap();
    gateway
}

pub fn operations(gateway: &InMemoryGateway) -> Vec<&'static str> {
    gateway.calls().iter().map(GatewayCall::operation).collect()
}

pub fn count(gateway: &InMemoryGateway, operation: &str) -> usize {
    operations(gateway).iter().filter(|op| **op == operation).count()
}
