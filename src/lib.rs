//! redmux - composable stream redundancy
//!
//! This crate exposes a single byte-stream endpoint backed by a group of
//! underlying streams and transparently applies a redundancy behavior:
//! replication ([`Mirror`]), striping ([`Stripe`]), or striping with a
//! dedicated XOR parity member ([`DedicatedParity`]). Behaviors implement
//! the same [`ByteStream`] contract they consume, so they compose: a stripe
//! of mirrors, a mirror of stripes, a parity stripe of mirrors.
//!
//! Below the behaviors sits the [`Member`] abstraction, which wraps one
//! underlying stream and hot-spares failed writes through a shared
//! [`SparePool`], growing an append-only segment chain that reads replay
//! transparently.

pub mod behavior;
pub mod error;
pub mod member;
pub mod spare;
pub mod stream;
pub mod testutil;
pub mod xor;

pub use behavior::{DedicatedParity, Mirror, Stripe};
pub use error::{Error, Result};
pub use member::{Member, MemberOptions};
pub use spare::SparePool;
pub use stream::{Behavior, ByteStream, State};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::stream::{Behavior, ByteStream, State};
}
