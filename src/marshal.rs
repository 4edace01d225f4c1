//! Argument marshaling between [`Arg`] values and wire [`TaggedValue`]s.
//!
//! Outbound: plain data passes through untouched, callbacks are registered
//! (deduplicated by identity) and replaced by their registry index, errors
//! are copied field by field. Inbound: callback references become remote
//! stubs bound to this endpoint's outbound handle; invoking a stub marshals
//! its own arguments against the local registry and enqueues a CALLBACK
//! envelope for the owning side.

use serde_json::Value;

use crate::callback::Callback;
use crate::outbound::OutboundHandle;
use crate::protocol::TaggedValue;
use crate::registry::CallbackRegistry;
use crate::value::{Arg, StructuredError};

/// Marshal one argument list for a RUN or CALLBACK payload.
pub fn marshal(registry: &mut CallbackRegistry, args: Vec<Arg>) -> Vec<TaggedValue> {
    args.into_iter()
        .map(|arg| marshal_one(registry, arg))
        .collect()
}

/// Marshal a single argument position.
pub fn marshal_one(registry: &mut CallbackRegistry, arg: Arg) -> TaggedValue {
    match arg {
        Arg::Value(value) => TaggedValue::Plain(value),
        Arg::Callback(callback) => TaggedValue::CallbackRef(registry.register(&callback)),
        Arg::Error(error) => TaggedValue::Error(error),
    }
}

/// Marshal a procedure outcome into RETURN's `(error, value)` positions.
///
/// Exactly one position is meaningful: success puts a plain null in the
/// error position, failure puts a plain null in the value position. The
/// value goes through the full pipeline, so a procedure may return a
/// callback.
pub fn marshal_outcome(
    registry: &mut CallbackRegistry,
    outcome: Result<Arg, StructuredError>,
) -> (TaggedValue, TaggedValue) {
    match outcome {
        Ok(value) => (TaggedValue::null(), marshal_one(registry, value)),
        Err(error) => (TaggedValue::Error(error), TaggedValue::null()),
    }
}

/// Unmarshal one argument list from a RUN or CALLBACK payload.
pub fn unmarshal(outbound: &OutboundHandle, tagged: Vec<TaggedValue>) -> Vec<Arg> {
    tagged
        .into_iter()
        .map(|value| unmarshal_one(outbound, value))
        .collect()
}

/// Unmarshal a single argument position.
pub fn unmarshal_one(outbound: &OutboundHandle, tagged: TaggedValue) -> Arg {
    match tagged {
        TaggedValue::Plain(value) => Arg::Value(value),
        TaggedValue::CallbackRef(index) => Arg::Callback(Callback::remote(index, outbound.clone())),
        TaggedValue::Error(error) => Arg::Error(error),
    }
}

/// Unmarshal RETURN's error position into the completion handler's error
/// argument.
///
/// Plain null means success. A plain non-null value in the error position
/// (legal for a foreign peer, whose procedures may fail with arbitrary
/// values) is promoted to a structured error so it is never mistaken for
/// success.
pub fn unmarshal_error(tagged: TaggedValue) -> Option<StructuredError> {
    match tagged {
        TaggedValue::Plain(Value::Null) => None,
        TaggedValue::Error(error) => Some(error),
        TaggedValue::Plain(Value::String(message)) => Some(StructuredError::new(message)),
        TaggedValue::Plain(other) => Some(StructuredError::new(other.to_string())),
        TaggedValue::CallbackRef(index) => Some(StructuredError::new(format!(
            "unresolvable error value: callback ref {index}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Envelope;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_outbound() -> (
        OutboundHandle,
        mpsc::UnboundedReceiver<Envelope>,
        Arc<Mutex<CallbackRegistry>>,
    ) {
        let registry = Arc::new(Mutex::new(CallbackRegistry::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let outbound =
            OutboundHandle::new(tx, Arc::new(AtomicUsize::new(0)), Arc::downgrade(&registry));
        (outbound, rx, registry)
    }

    #[test]
    fn test_plain_values_pass_through_unchanged() {
        let mut registry = CallbackRegistry::new();
        let payload = json!({"list": [1, 2, 3], "nested": {"ok": true}});

        let tagged = marshal(&mut registry, vec![Arg::Value(payload.clone())]);
        assert_eq!(tagged, vec![TaggedValue::Plain(payload)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_callbacks_marshal_to_deduplicated_indices() {
        let mut registry = CallbackRegistry::new();
        let cb = Callback::new(|_| {});

        let tagged = marshal(
            &mut registry,
            vec![
                Arg::Callback(cb.clone()),
                Arg::Value(json!("between")),
                Arg::Callback(cb.clone()),
            ],
        );

        assert_eq!(
            tagged,
            vec![
                TaggedValue::CallbackRef(0),
                TaggedValue::Plain(json!("between")),
                TaggedValue::CallbackRef(0),
            ]
        );
        assert_eq!(registry.len(), 1);

        // Same callable in a later marshal still maps to the same index.
        let again = marshal(&mut registry, vec![Arg::Callback(cb)]);
        assert_eq!(again, vec![TaggedValue::CallbackRef(0)]);
    }

    #[test]
    fn test_error_fields_copied_by_value() {
        let mut registry = CallbackRegistry::new();
        let error = StructuredError::new("boom")
            .with_location("job.rs", 12)
            .with_stack_trace("at job.rs:12");

        let tagged = marshal(&mut registry, vec![Arg::Error(error.clone())]);
        assert_eq!(tagged, vec![TaggedValue::Error(error)]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unmarshal_builds_remote_stubs() {
        let (outbound, _rx, _registry) = test_outbound();

        let args = unmarshal(
            &outbound,
            vec![TaggedValue::CallbackRef(4), TaggedValue::Plain(json!(7))],
        );

        let stub = args[0].as_callback().unwrap();
        assert!(stub.is_remote());
        assert_eq!(stub.remote_index(), Some(4));
        assert_eq!(args[1], Arg::Value(json!(7)));
    }

    #[test]
    fn test_stub_invocation_sends_callback_envelope() {
        let (outbound, mut rx, _registry) = test_outbound();

        let stub = unmarshal_one(&outbound, TaggedValue::CallbackRef(4));
        let stub = stub.into_callback().unwrap();
        stub.invoke(vec![Arg::Value(json!(1)), Arg::Value(json!("two"))])
            .unwrap();

        let envelope = rx.try_recv().unwrap();
        assert_eq!(
            envelope,
            Envelope::Callback {
                index: 4,
                args: vec![
                    TaggedValue::Plain(json!(1)),
                    TaggedValue::Plain(json!("two")),
                ],
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stub_arguments_register_against_local_registry() {
        let (outbound, mut rx, registry) = test_outbound();

        let stub = unmarshal_one(&outbound, TaggedValue::CallbackRef(9))
            .into_callback()
            .unwrap();
        let local = Callback::new(|_| {});
        stub.invoke(vec![Arg::Callback(local)]).unwrap();

        let envelope = rx.try_recv().unwrap();
        assert_eq!(
            envelope,
            Envelope::Callback {
                index: 9,
                args: vec![TaggedValue::CallbackRef(0)],
            }
        );
        assert_eq!(registry.lock().len(), 1);
    }

    #[test]
    fn test_marshal_outcome_success() {
        let mut registry = CallbackRegistry::new();
        let (error, value) = marshal_outcome(&mut registry, Ok(Arg::Value(json!(5))));
        assert!(error.is_null());
        assert_eq!(value, TaggedValue::Plain(json!(5)));
    }

    #[test]
    fn test_marshal_outcome_failure() {
        let mut registry = CallbackRegistry::new();
        let (error, value) =
            marshal_outcome(&mut registry, Err(StructuredError::new("no such thing")));
        assert_eq!(error, TaggedValue::Error(StructuredError::new("no such thing")));
        assert!(value.is_null());
    }

    #[test]
    fn test_marshal_outcome_may_return_a_callback() {
        let mut registry = CallbackRegistry::new();
        let (error, value) =
            marshal_outcome(&mut registry, Ok(Arg::Callback(Callback::new(|_| {}))));
        assert!(error.is_null());
        assert_eq!(value, TaggedValue::CallbackRef(0));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unmarshal_error_positions() {
        assert_eq!(unmarshal_error(TaggedValue::null()), None);

        let structured = StructuredError::new("boom").with_location("f.rs", 3);
        assert_eq!(
            unmarshal_error(TaggedValue::Error(structured.clone())),
            Some(structured)
        );

        // Foreign peers may fail with bare values; never read those as success.
        assert_eq!(
            unmarshal_error(TaggedValue::Plain(json!("oops"))),
            Some(StructuredError::new("oops"))
        );
        assert_eq!(
            unmarshal_error(TaggedValue::Plain(json!({"code": 7}))),
            Some(StructuredError::new("{\"code\":7}"))
        );
        assert!(unmarshal_error(TaggedValue::CallbackRef(2)).is_some());
    }
}
