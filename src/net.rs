//! TCP transport: framed sockets and the accepting server.

pub mod server;
pub mod socket;
