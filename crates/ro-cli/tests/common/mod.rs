// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::path::Path;

use ro_cli::commands::Context;
use ro_core::models::DeployOptions;
use ro_core::services::memory_gateway::InMemoryGateway;
use ro_core::services::progress::NoopProgress;

pub const WEB_DEFINITION: &str =
    r#"{"family": "web", "containerDefinitions": [{"name": "web", "image": "nginx:1.25"}]}"#;

pub const JOB_DEFINITION: &str =
    r#"{"family": "job", "containerDefinitions": [{"name": "migrate", "image": "migrate:7"}]}"#;

/// Write `contents` to `dir/name` and return the path as a string argument.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

pub fn context(gateway: &InMemoryGateway) -> Context<'_> {
    Context {
        gateway,
        progress: &NoopProgress,
        options: DeployOptions::default(),
    }
}

pub fn output(buf: Vec<u8>) -> String {
    String::from_utf8(buf).unwrap()
}
