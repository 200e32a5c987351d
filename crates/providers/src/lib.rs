//! LLM provider implementations for Pincer.
//!
//! All providers implement the `pincer_core::Provider` trait.
//! The router selects the provider named by configuration.

pub mod router;
pub mod stub;

pub use router::{ProviderRouter, build_from_config};
pub use stub::StubProvider;
