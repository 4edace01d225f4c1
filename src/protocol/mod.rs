//! Protocol module - envelope kinds, tagged values, and their wire layouts.
//!
//! This module defines the data model that crosses the channel:
//! - `Envelope`: one message, four kinds (USER/RUN/CALLBACK/RETURN)
//! - `TaggedValue`: one argument position (PLAIN/CALLBACK_REF/ERROR)
//!
//! No byte-level encoding lives here; channel adapters serialize the types
//! with whatever self-describing serde format they choose.

mod envelope;
mod tagged;

pub use envelope::{kind, Envelope};
pub use tagged::{tag, TaggedValue};
