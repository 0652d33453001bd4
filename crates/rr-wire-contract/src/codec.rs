// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Frame decoding and encoding

use crate::error::ContractError;
use crate::messages::{ClientMessage, ServerMessage};
use serde_json::Value;

/// Result of decoding a well-formed client frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ClientMessage),
    /// A JSON object whose `type` is not part of the contract
    Unknown(String),
}

/// Decode a client text frame
///
/// Frames with an unrecognised `type` decode to [`Inbound::Unknown`] so the
/// caller can ignore them; a recognised `type` with missing or mistyped
/// fields is an error.
pub fn decode_client_message(text: &str) -> Result<Inbound, ContractError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(ref object) = value else {
        return Err(ContractError::NotAnObject);
    };
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ContractError::MissingType)?
        .to_string();

    if !ClientMessage::KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(Inbound::Unknown(kind));
    }

    serde_json::from_value(value)
        .map(Inbound::Message)
        .map_err(|source| ContractError::InvalidPayload { kind, source })
}

pub fn encode_server_message(message: &ServerMessage) -> Result<String, ContractError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_known_messages() {
        assert_eq!(
            decode_client_message(r#"{"type":"authenticate","token":"abc"}"#).unwrap(),
            Inbound::Message(ClientMessage::Authenticate {
                token: "abc".into()
            })
        );
        assert_eq!(
            decode_client_message(r#"{"type":"heartbeat","ts":123}"#).unwrap(),
            Inbound::Message(ClientMessage::Heartbeat)
        );
    }

    #[test]
    fn unknown_type_is_reported_not_rejected() {
        assert_eq!(
            decode_client_message(r#"{"type":"subscribe","channel":"x"}"#).unwrap(),
            Inbound::Unknown("subscribe".into())
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            decode_client_message("not json"),
            Err(ContractError::Json(_))
        ));
        assert!(matches!(
            decode_client_message("[1,2]"),
            Err(ContractError::NotAnObject)
        ));
        assert!(matches!(
            decode_client_message(r#"{"runId":"r1"}"#),
            Err(ContractError::MissingType)
        ));
        assert!(matches!(
            decode_client_message(r#"{"type":7}"#),
            Err(ContractError::MissingType)
        ));
        assert!(matches!(
            decode_client_message(r#"{"type":"start_agent"}"#),
            Err(ContractError::InvalidPayload { ref kind, .. }) if kind == "start_agent"
        ));
    }

    #[test]
    fn encodes_error_frame() {
        let text = encode_server_message(&ServerMessage::error("Not authenticated")).unwrap();
        assert_eq!(text, r#"{"type":"error","error":"Not authenticated"}"#);
    }

    proptest! {
        // Arbitrary input never panics the decoder.
        #[test]
        fn decoder_is_total(text in ".{0,64}") {
            let _ = decode_client_message(&text);
        }

        #[test]
        fn start_agent_preserves_run_id(run_id in "[a-zA-Z0-9-]{1,36}") {
            let text = serde_json::json!({"type": "start_agent", "runId": run_id}).to_string();
            prop_assert_eq!(
                decode_client_message(&text).unwrap(),
                Inbound::Message(ClientMessage::StartAgent { run_id: run_id.clone() })
            );
        }
    }
}
