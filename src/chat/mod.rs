//! Chat front end: sessions, agent invocation and answer rendering

pub mod error;
pub mod invoker;
pub mod render;
pub mod session;

pub use error::ChatError;
pub use invoker::{resolve_target, AgentInvoker, BedrockAgentInvoker};
pub use render::format_response;
pub use session::{ChatSession, SessionStore};
