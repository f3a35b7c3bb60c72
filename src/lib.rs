//! launch-notify: notifications for feature launch tracking.

pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod mail;
pub mod notifier;
pub mod permissions;
pub mod preview;
pub mod review;
pub mod store;
pub mod tasks;
pub mod users;
