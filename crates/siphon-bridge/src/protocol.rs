//! Wire messages for the siphon memory-tap service
//!
//! Messages are MessagePack maps keyed by their snake_case variant name and
//! travel inside the length-prefixed frames of [`crate::transport`]. The
//! client speaks first with `hello`; every later exchange is one request
//! followed by one reply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use siphon_rl_core::{AttrValue, Frame, FrameSpec, Result, SiphonRLError};

/// Everything that crosses the wire, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SiphonMessage {
    // === client -> service ===
    /// Handshake opener; the service answers with `Ready`.
    Hello { client: String, version: String },
    /// Replace the currently held inputs with this set.
    InputState { inputs: Vec<String>, persistent: bool },
    /// Capture a frame plus the tapped memory attributes.
    Capture,
    /// Let the game run for `count` rendered frames.
    WaitFrames { count: u32 },
    /// Read memory attributes by name.
    GetAttributes { names: Vec<String> },
    /// Write one memory attribute.
    SetAttribute { name: String, value: AttrValue },
    /// Scale the game clock; `0.0` freezes it.
    SetGameSpeed { speed: f64 },
    /// Tear down and restart the named scenario.
    ResetScenario { scenario: String },
    /// Close the session. No reply is sent.
    Shutdown,

    // === service -> client ===
    /// Handshake reply describing what the tap can provide.
    Ready {
        game: String,
        version: String,
        capture: FrameSpec,
        attributes: Vec<String>,
    },
    /// Reply to `Capture`.
    Telemetry {
        frame: Frame,
        attributes: BTreeMap<String, AttrValue>,
    },
    /// Reply to `GetAttributes`.
    AttributeValues { values: BTreeMap<String, AttrValue> },
    /// Success reply for requests that carry no payload back.
    Ack,
    /// Failure reply for any request.
    Error { code: i32, message: String },
}

impl SiphonMessage {
    /// Wire name of the variant, for log and error text.
    pub fn label(&self) -> &'static str {
        match self {
            SiphonMessage::Hello { .. } => "hello",
            SiphonMessage::InputState { .. } => "input_state",
            SiphonMessage::Capture => "capture",
            SiphonMessage::WaitFrames { .. } => "wait_frames",
            SiphonMessage::GetAttributes { .. } => "get_attributes",
            SiphonMessage::SetAttribute { .. } => "set_attribute",
            SiphonMessage::SetGameSpeed { .. } => "set_game_speed",
            SiphonMessage::ResetScenario { .. } => "reset_scenario",
            SiphonMessage::Shutdown => "shutdown",
            SiphonMessage::Ready { .. } => "ready",
            SiphonMessage::Telemetry { .. } => "telemetry",
            SiphonMessage::AttributeValues { .. } => "attribute_values",
            SiphonMessage::Ack => "ack",
            SiphonMessage::Error { .. } => "error",
        }
    }
}

/// Encode a message as a MessagePack map with named fields.
pub fn encode(message: &SiphonMessage) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(message)
        .map_err(|e| SiphonRLError::Serialization(format!("encode {}: {e}", message.label())))
}

/// Decode one MessagePack message body.
pub fn decode(data: &[u8]) -> Result<SiphonMessage> {
    rmp_serde::from_slice(data)
        .map_err(|e| SiphonRLError::Serialization(format!("decode message: {e}")))
}
