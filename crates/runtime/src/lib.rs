//! Runtime services for the liftoff CLI
//!
//! This crate contains the foundational types used across the liftoff CLI:
//! configuration, the HTTP client for the deployment service, token providers,
//! terminal output, and the dependency injection interfaces tying them together.

/// API client module for interacting with the deployment service
pub mod api_client;
/// Bearer token sources
pub mod auth;
/// Configuration constants and the sectioned config file
pub mod config;
/// Dependency injection traits
pub mod deps;
/// Terminal output implementations
pub mod ui;

// Re-export commonly used types at the crate root
pub use api_client::{ApiError, RealCloudApiClient};
pub use auth::{
    AuthError, AuthToken, EnvTokenProvider, StoredTokenProvider, TokenSource,
    select_auth_provider,
};
pub use config::{
    API_URL_ENV_VAR, AUTH_TOKEN_ENV_VAR, BASE_IGNORE_FILE, DEFAULT_API_BASE_URL, DeploySettings,
    OVERRIDE_IGNORE_FILE,
};
pub use deps::{
    AuthProvider, CloudApiClient, LineStream, MessageStyle, ProgressIndicator, StatusReport,
    UploadReceipt, UserInterface,
};
pub use ui::{RealUserInterface, TestUserInterface};
