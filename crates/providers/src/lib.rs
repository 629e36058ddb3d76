//! LLM provider implementations for tabforge.
//!
//! All providers implement the `tabforge_core::Provider` trait. The
//! pipeline selects a provider from configuration at startup.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
