//! Social post generation service.
//!
//! Turns a content concept plus source material into a platform-ready post:
//! a caption, hashtags and a nine-image carousel generated with Cloudflare
//! Workers AI and stored in R2. The HTTP API queues jobs; workers run them
//! through the [`pipeline`].

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
