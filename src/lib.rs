//! TFTP (RFC 1350) client and server library with option negotiation
//! (RFC 2347/2348/2349). The protocol core (`tftp`) is always available;
//! the socket-driving server and client façades are feature-gated so a
//! consumer embedding only one side doesn't pull in the other's
//! dependencies unnecessarily.

pub mod tftp;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

#[cfg(any(feature = "server", feature = "client"))]
pub mod cli;
