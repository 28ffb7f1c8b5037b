//! HTTP surface.

pub mod client;
pub mod client_auth;
pub mod request_id;
