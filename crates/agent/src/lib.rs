pub mod handlers;
pub mod health;
pub mod runtime;

pub use handlers::HandlerDeps;
pub use runtime::AgentRuntime;
