pub mod app;
pub mod auth;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod error_map;
pub mod handlers;
pub mod markers;
pub mod models;
pub mod normalize;
pub mod openai;
pub mod pairing;
pub mod providers;
pub mod stream;
pub mod tokens;
pub mod upstream;
