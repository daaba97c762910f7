//! Threadbot core library: answers Slack mentions in their thread with an
//! LLM agent, one reply cycle per thread at a time. Used by the CLI.

pub mod agent;
pub mod config;
pub mod gateway;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod response;
pub mod slack;
pub mod thread_lock;
pub mod tools;
