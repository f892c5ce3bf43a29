//! imageinf Server
//!
//! HTTP front end for image inference: authenticates Tapis callers, validates
//! requests, and hands work to the job manager.

pub mod auth;
pub mod config;
pub mod routes;
pub mod security;
pub mod state;

pub use auth::{AuthError, Authenticator, TenantKeyValidator, TokenValidator, UnverifiedValidator};
pub use config::{ConfigOverrides, ServerConfig};
pub use routes::create_router;
pub use security::TenantAllowlist;
pub use state::AppState;
