//! External integrations module.
//!
//! Provides a client for the OpenAI chat-completions API used by the
//! LLM extraction provider.

pub mod openai;

pub use openai::OpenAIClient;
