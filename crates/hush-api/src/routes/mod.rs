//! Route modules, one per surface area.

pub mod approval;
pub mod auth;
pub mod devices;
pub mod health;
pub mod media;
pub mod messages;
pub mod users;
