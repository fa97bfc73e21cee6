pub mod config_loader;
pub mod document;
pub mod gateway;
pub mod http_gateway;
pub mod memory_gateway;
pub mod orchestrator;
pub mod progress;
pub mod registrar;
pub mod waiter;
