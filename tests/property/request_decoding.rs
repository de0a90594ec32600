//! Property-based tests for bus payload decoding.
//!
//! Uses proptest to verify:
//! 1. Any request survives encode → decode.
//! 2. Arbitrary text never panics in `decode` (returns `Err` gracefully).
//! 3. A `RelayResult` always keeps exactly one of `messageId` / `error`.

use proptest::prelude::*;
use xmtpbridge_proto::request::{self, RelayRequest};
use xmtpbridge_proto::result::RelayResult;

/// Strategy for arbitrary relay requests, including unicode and JSON
/// metacharacters in both fields.
fn arb_request() -> impl Strategy<Value = RelayRequest> {
    ("(0x)?[0-9a-fA-F]{0,40}", "\\PC{0,256}")
        .prop_map(|(address, message)| RelayRequest::new(address, message))
}

fn arb_result() -> impl Strategy<Value = RelayResult> {
    prop_oneof![
        "[a-z0-9-]{1,64}".prop_map(RelayResult::sent),
        "\\PC{0,128}".prop_map(RelayResult::failed),
    ]
}

proptest! {
    #[test]
    fn request_encode_decode(req in arb_request()) {
        let json = request::encode(&req).unwrap();
        let decoded = request::decode(&json).unwrap();
        prop_assert_eq!(decoded, req);
    }

    #[test]
    fn decode_arbitrary_text_never_panics(text in "\\PC{0,512}") {
        let _ = request::decode(&text);
    }

    #[test]
    fn result_wire_form_has_exactly_one_payload(result in arb_result()) {
        let value = serde_json::to_value(&result).unwrap();
        let has_id = value.get("messageId").is_some();
        let has_err = value.get("error").is_some();
        prop_assert!(has_id ^ has_err);
        prop_assert_eq!(value["success"].as_bool(), Some(has_id));
        let back: RelayResult = serde_json::from_value(value).unwrap();
        prop_assert_eq!(back, result);
    }
}
