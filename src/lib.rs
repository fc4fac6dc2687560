pub mod api;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod geo;
pub mod geolocation;
pub mod manifest;
pub mod models;
pub mod observability;
pub mod platform;
pub mod state;
