//! # askfiles-core
//!
//! Core library for askfiles - question answering over files stored with the
//! Gemini Files API.
//!
//! This library provides:
//! - A Gemini REST client behind the [`GenerativeBackend`] trait
//! - The model invocation policy (retry with backoff, fallback on overload)
//! - The file activation table that gates "all files" questions
//! - The [`Assistant`] that resolves files and answers questions
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use askfiles_core::{ActivationStore, ChatRequest, Config, ServiceRegistry};
//!
//! # async fn run() -> askfiles_core::Result<()> {
//! let config = Config::load()?;
//! let activation = Arc::new(ActivationStore::open(config.activation.resolved_path()));
//! let registry = ServiceRegistry::gemini(config, activation);
//!
//! let assistant = registry.apply("AIza...")?;
//! let answer = assistant
//!     .ask(ChatRequest {
//!         question: "Summarize the report".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{}", answer.response);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use activation::{ActivationRecord, ActivationStore};
pub use assistant::{Assistant, FileListing, FileStats, FileWithStatus, UsageSummary};
pub use config::Config;
pub use error::{Error, Result};
pub use gemini::{GeminiClient, GenerativeBackend};
pub use policy::{InvocationPolicy, ModelRoster, RetryPlan};
pub use registry::{BackendFactory, ServiceRegistry};
pub use types::*;

// Public modules
pub mod activation;
pub mod assistant;
pub mod config;
pub mod error;
pub mod gemini;
pub mod logging;
pub mod policy;
pub mod registry;
pub mod types;
