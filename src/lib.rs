pub mod base64;
pub mod config;
pub mod db;
pub mod encryption;
pub mod errors;
mod http_client;
pub mod link_unfurler;
pub mod manifest;
pub mod oauth;
pub mod player;
pub mod server;
pub mod service_provider;
pub mod signature;
pub mod slack_handler;
pub mod unfurl_builder;
pub mod video_processor;

#[cfg(test)]
mod slack_handler_test;

pub use http_client::build_http_client;
