pub mod auth;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod extractor;
pub mod google;
pub mod invoicing;
pub mod organizations;
pub mod packages;
pub mod routes;
pub mod users;
pub mod webhooks;
