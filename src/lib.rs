pub mod config;
pub mod gemini;
pub mod modal;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod web;

pub use gemini::{GatewayConfig, GeminiClient};
pub use orchestrator::ChatOrchestrator;
pub use store::SessionStore;
