//! Envelope encoding.
//!
//! Every message on the channel is one envelope, serialized as a sequence
//! whose first element is the numeric kind:
//! ```text
//! [0, applicationValue]                                  USER
//! [1, procedureRef, slotIndex, TaggedValue...]           RUN
//! [2, callbackIndex, TaggedValue...]                     CALLBACK
//! [3, slotIndex, TaggedValue(error), TaggedValue(value)] RETURN
//! ```
//! RUN and CALLBACK carry their arguments inline after the fixed fields;
//! USER and RETURN have fixed arity and reject trailing elements.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::tagged::TaggedValue;

/// Kind constants for envelopes.
pub mod kind {
    /// Application message, delivered to the user message handler.
    pub const USER: u8 = 0;
    /// Procedure invocation request.
    pub const RUN: u8 = 1;
    /// Invocation of a persistent callback on the receiving side.
    pub const CALLBACK: u8 = 2;
    /// Completion of a RUN, resolving the caller's slot.
    pub const RETURN: u8 = 3;

    /// Human-readable kind name for logging.
    pub fn name(kind: u8) -> &'static str {
        match kind {
            USER => "USER",
            RUN => "RUN",
            CALLBACK => "CALLBACK",
            RETURN => "RETURN",
            _ => "UNKNOWN",
        }
    }
}

/// One message on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Fire-and-forget application message.
    User { data: Value },
    /// Invoke `procedure` on the receiving side; the sender's slot `slot`
    /// will be resolved by the matching RETURN.
    Run {
        procedure: String,
        slot: u32,
        args: Vec<TaggedValue>,
    },
    /// Invoke the persistent callback registered at `index` on the
    /// receiving side. No return path.
    Callback { index: u32, args: Vec<TaggedValue> },
    /// Resolve slot `slot` on the receiving side with an (error, value)
    /// outcome. Exactly one of the two positions is meaningful: `error` is
    /// plain null on success.
    Return {
        slot: u32,
        error: TaggedValue,
        value: TaggedValue,
    },
}

impl Envelope {
    /// Wire kind of this envelope.
    #[inline]
    pub fn kind(&self) -> u8 {
        match self {
            Envelope::User { .. } => kind::USER,
            Envelope::Run { .. } => kind::RUN,
            Envelope::Callback { .. } => kind::CALLBACK,
            Envelope::Return { .. } => kind::RETURN,
        }
    }

    /// Human-readable kind name for logging.
    #[inline]
    pub fn kind_name(&self) -> &'static str {
        kind::name(self.kind())
    }

    /// Check if this is an application message.
    #[inline]
    pub fn is_user(&self) -> bool {
        matches!(self, Envelope::User { .. })
    }

    /// Check if this is an invocation request.
    #[inline]
    pub fn is_run(&self) -> bool {
        matches!(self, Envelope::Run { .. })
    }

    /// Check if this is a callback invocation.
    #[inline]
    pub fn is_callback(&self) -> bool {
        matches!(self, Envelope::Callback { .. })
    }

    /// Check if this is a completion.
    #[inline]
    pub fn is_return(&self) -> bool {
        matches!(self, Envelope::Return { .. })
    }
}

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Envelope::User { data } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(&kind::USER)?;
                seq.serialize_element(data)?;
                seq.end()
            }
            Envelope::Run {
                procedure,
                slot,
                args,
            } => {
                let mut seq = serializer.serialize_seq(Some(3 + args.len()))?;
                seq.serialize_element(&kind::RUN)?;
                seq.serialize_element(procedure)?;
                seq.serialize_element(slot)?;
                for arg in args {
                    seq.serialize_element(arg)?;
                }
                seq.end()
            }
            Envelope::Callback { index, args } => {
                let mut seq = serializer.serialize_seq(Some(2 + args.len()))?;
                seq.serialize_element(&kind::CALLBACK)?;
                seq.serialize_element(index)?;
                for arg in args {
                    seq.serialize_element(arg)?;
                }
                seq.end()
            }
            Envelope::Return { slot, error, value } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element(&kind::RETURN)?;
                seq.serialize_element(slot)?;
                seq.serialize_element(error)?;
                seq.serialize_element(value)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EnvelopeVisitor;

        impl EnvelopeVisitor {
            fn require<'de, A, T>(seq: &mut A, index: usize) -> Result<T, A::Error>
            where
                A: SeqAccess<'de>,
                T: Deserialize<'de>,
            {
                seq.next_element()?
                    .ok_or_else(|| de::Error::invalid_length(index, &"a complete envelope"))
            }

            fn require_end<'de, A>(seq: &mut A) -> Result<(), A::Error>
            where
                A: SeqAccess<'de>,
            {
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom("trailing elements in envelope"));
                }
                Ok(())
            }

            fn drain_args<'de, A>(seq: &mut A) -> Result<Vec<TaggedValue>, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut args = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(arg) = seq.next_element::<TaggedValue>()? {
                    args.push(arg);
                }
                Ok(args)
            }
        }

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = Envelope;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an envelope sequence starting with a kind byte")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Envelope, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let kind: u8 = Self::require(&mut seq, 0)?;
                match kind {
                    kind::USER => {
                        let data = Self::require(&mut seq, 1)?;
                        Self::require_end(&mut seq)?;
                        Ok(Envelope::User { data })
                    }
                    kind::RUN => {
                        let procedure = Self::require(&mut seq, 1)?;
                        let slot = Self::require(&mut seq, 2)?;
                        let args = Self::drain_args(&mut seq)?;
                        Ok(Envelope::Run {
                            procedure,
                            slot,
                            args,
                        })
                    }
                    kind::CALLBACK => {
                        let index = Self::require(&mut seq, 1)?;
                        let args = Self::drain_args(&mut seq)?;
                        Ok(Envelope::Callback { index, args })
                    }
                    kind::RETURN => {
                        let slot = Self::require(&mut seq, 1)?;
                        let error = Self::require(&mut seq, 2)?;
                        let value = Self::require(&mut seq, 3)?;
                        Self::require_end(&mut seq)?;
                        Ok(Envelope::Return { slot, error, value })
                    }
                    other => Err(de::Error::custom(format!(
                        "unknown envelope kind: {other}"
                    ))),
                }
            }
        }

        deserializer.deserialize_seq(EnvelopeVisitor)
    }
}
