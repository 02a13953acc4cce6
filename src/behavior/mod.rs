//! Redundancy behaviors
//!
//! Each behavior exposes the byte-stream endpoint backed by a group of
//! members: replication (mirror), striping (stripe), or striping with a
//! dedicated XOR parity member (dedicated-parity). Behaviors implement the
//! stream contract themselves, so they nest freely.

pub mod mirror;
pub mod parity;
pub mod stripe;

pub use mirror::Mirror;
pub use parity::DedicatedParity;
pub use stripe::Stripe;
