//! Headless client for the Reelio social platform.
//!
//! The backend is reached over REST ([`api`]) and a single WebSocket
//! ([`socket`]). State holders such as [`sync::ConversationManager`],
//! [`pagination::ReelFeed`] and [`feed::FeedState`] take their collaborators
//! as trait objects and can be driven without a network.

pub mod admin;
pub mod api;
pub mod assets;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod metrics;
pub mod models;
pub mod optimistic;
pub mod pagination;
pub mod session;
pub mod socket;
pub mod storage;
pub mod sync;
pub mod upload;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
