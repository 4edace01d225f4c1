//! Tagged value encoding.
//!
//! Every argument position in a RUN, CALLBACK, or RETURN payload is a
//! `[tag, value]` pair:
//! ```text
//! [0, <json>]                       plain value, passes through untouched
//! [1, <index>]                      callback reference into the sender's registry
//! [2, {message, sourceLocation?, stackTrace?}]   structured error, copied by value
//! ```
//! The serde impls below produce exactly this two-element sequence so any
//! self-describing format (JSON, MessagePack) reproduces the layout.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::value::StructuredError;

/// Tag constants for value positions.
pub mod tag {
    /// Plain application data.
    pub const PLAIN: u8 = 0;
    /// Callback reference (registry index on the sending side).
    pub const CALLBACK_REF: u8 = 1;
    /// Structured error, copied by value.
    pub const ERROR: u8 = 2;
}

/// One marshaled argument position.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    /// Arbitrary application data.
    Plain(Value),
    /// Index into the *sender's* callback registry.
    CallbackRef(u32),
    /// Error fields copied by value; carries no callable identity.
    Error(StructuredError),
}

impl TaggedValue {
    /// The null plain value, used for the empty error position of a
    /// successful RETURN.
    pub fn null() -> Self {
        TaggedValue::Plain(Value::Null)
    }

    /// Wire tag of this value.
    #[inline]
    pub fn tag(&self) -> u8 {
        match self {
            TaggedValue::Plain(_) => tag::PLAIN,
            TaggedValue::CallbackRef(_) => tag::CALLBACK_REF,
            TaggedValue::Error(_) => tag::ERROR,
        }
    }

    /// Check if this is the plain null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, TaggedValue::Plain(Value::Null))
    }
}

impl Serialize for TaggedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        match self {
            TaggedValue::Plain(value) => {
                seq.serialize_element(&tag::PLAIN)?;
                seq.serialize_element(value)?;
            }
            TaggedValue::CallbackRef(index) => {
                seq.serialize_element(&tag::CALLBACK_REF)?;
                seq.serialize_element(index)?;
            }
            TaggedValue::Error(error) => {
                seq.serialize_element(&tag::ERROR)?;
                seq.serialize_element(error)?;
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TaggedValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TaggedValueVisitor;

        impl<'de> Visitor<'de> for TaggedValueVisitor {
            type Value = TaggedValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [tag, value] pair")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<TaggedValue, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let tag: u8 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let tagged = match tag {
                    tag::PLAIN => TaggedValue::Plain(
                        seq.next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?,
                    ),
                    tag::CALLBACK_REF => TaggedValue::CallbackRef(
                        seq.next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?,
                    ),
                    tag::ERROR => TaggedValue::Error(
                        seq.next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?,
                    ),
                    other => {
                        return Err(de::Error::custom(format!("unknown value tag: {other}")))
                    }
                };
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("trailing elements in tagged value"));
                }
                Ok(tagged)
            }
        }

        deserializer.deserialize_seq(TaggedValueVisitor)
    }
}
