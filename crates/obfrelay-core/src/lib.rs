//! obfrelay Core Library
//!
//! Everything the relay needs that is independent of the chat transport:
//! - Configuration resolution
//! - The messaging gateway seam and request types
//! - Per-user workspace directories
//! - External transformer invocation
//! - The file processing workflow itself

pub mod config;
pub mod error;
pub mod gateway;
pub mod relay;
pub mod tracing_init;
pub mod transformer;
pub mod workspace;

pub use config::{Config, RelayConfig, ServerConfig};
pub use error::{Error, Result};
pub use gateway::{ChatRef, GatewayError, IncomingDocument, MessagingGateway, UploadRequest};
pub use relay::{FileProcessingRelay, RelayFailure};
pub use transformer::{TransformError, Transformer};
pub use workspace::{WorkspaceDir, WorkspaceError, Workspaces};
