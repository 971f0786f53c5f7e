//! Operation bodies, one module per resource family

pub mod common;
pub mod compute;
pub mod dns;
pub mod identity;
pub mod network;
pub mod server;
pub mod share;
pub mod volume;
