//! Generation provider integration for Lumen.
//!
//! A provider-agnostic [`LlmClient`] trait, concrete clients, and the
//! [`RetryPolicy`] shared with the embedding providers.
//!
//! # Example
//! ```no_run
//! use lumen_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new()?;
//! let request = LlmRequest::new("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod retry;

pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::{create_client, ProviderType};
pub use providers::{MockClient, OllamaClient};
pub use retry::{CallError, RetryPolicy};
