//! Canonical message model, tool-call sequence validator, OAuth2 token
//! manager, and upstream client shared by every dialect converter and by
//! `gateway-service`.

pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod token_manager;
pub mod upstream;
pub mod validator;

pub use error::GatewayError;
pub use message::{CanonicalMessage, CanonicalReply, FinishReason, ToolCallRecord, Usage};
pub use token_manager::TokenManager;
pub use validator::validate;
