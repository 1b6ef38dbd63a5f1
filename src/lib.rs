pub mod chat;
pub mod config;
pub mod constants;
pub mod llm_interaction;
pub mod playback;
pub mod resolver;
pub mod transcript;
pub mod web_server;
