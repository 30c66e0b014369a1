//! TCP client for the siphon tap
//!
//! Connects to the memory-tap service running beside the game, performs the
//! `hello`/`ready` handshake, then drives the session one request at a time.
//! [`SiphonClient`] implements [`GameInterface`], so an environment can sit
//! directly on top of it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use siphon_rl_core::{
    ActionCommand, AttrValue, FrameSpec, Result, SiphonRLError, TelemetrySnapshot,
};
use siphon_rl_env::GameInterface;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::protocol::{SiphonMessage, decode, encode};
use crate::transport::{read_message, write_message};

/// Connection settings for [`SiphonClient::connect`]. Loadable from JSON
/// with every field optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SiphonClientConfig {
    /// Address the tap listens on
    pub address: String,

    /// Connection bound in milliseconds
    pub connect_timeout_ms: u64,

    /// Reply bound for ordinary requests in milliseconds
    pub request_timeout_ms: u64,

    /// Reply bound for scenario resets, which sit through loading screens
    pub reset_timeout_ms: u64,

    /// Scenario restarted by `reset_episode`
    pub scenario: String,
}

impl Default for SiphonClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:50051".to_string(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 5_000,
            reset_timeout_ms: 60_000,
            scenario: "margit".to_string(),
        }
    }
}

impl SiphonClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Handshake facts reported by the tap
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyInfo {
    pub game: String,
    pub version: String,
    pub capture: FrameSpec,
    pub attributes: Vec<String>,
}

/// One TCP session with the siphon tap.
///
/// Requests and replies alternate strictly, so the client owns both stream
/// halves and needs no background task.
#[derive(Debug)]
pub struct SiphonClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    config: SiphonClientConfig,
    ready: ReadyInfo,
}

impl SiphonClient {
    /// Connects and completes the handshake.
    pub async fn connect(config: SiphonClientConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout(), TcpStream::connect(&config.address))
            .await
            .map_err(|_| {
                SiphonRLError::Ipc(format!(
                    "connect to {} timed out after {}ms",
                    config.address, config.connect_timeout_ms
                ))
            })?
            .map_err(|e| SiphonRLError::Ipc(format!("connect to {}: {e}", config.address)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| SiphonRLError::Ipc(format!("set TCP_NODELAY: {e}")))?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = SiphonMessage::Hello {
            client: "siphon-rl".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        write_message(&mut writer, &encode(&hello)?).await?;
        let raw = timeout(config.request_timeout(), read_message(&mut reader))
            .await
            .map_err(|_| {
                SiphonRLError::Ipc(format!(
                    "no ready reply within {}ms",
                    config.request_timeout_ms
                ))
            })??;
        let ready = match decode(&raw)? {
            SiphonMessage::Ready {
                game,
                version,
                capture,
                attributes,
            } => ReadyInfo {
                game,
                version,
                capture,
                attributes,
            },
            SiphonMessage::Error { code, message } => {
                return Err(SiphonRLError::Game { code, message });
            }
            other => {
                return Err(SiphonRLError::Protocol(format!(
                    "handshake expected ready, got {}",
                    other.label()
                )));
            }
        };

        info!(
            address = %config.address,
            game = %ready.game,
            version = %ready.version,
            "connected to siphon tap"
        );

        Ok(Self {
            reader,
            writer,
            config,
            ready,
        })
    }

    /// Handshake facts reported by the tap
    pub fn ready(&self) -> &ReadyInfo {
        &self.ready
    }

    async fn send(&mut self, message: &SiphonMessage) -> Result<()> {
        write_message(&mut self.writer, &encode(message)?).await
    }

    /// One request, one reply. A service-reported failure comes back as a
    /// `Game` error; a missing reply is an `Ipc` error.
    async fn request(&mut self, message: SiphonMessage, bound: Duration) -> Result<SiphonMessage> {
        let label = message.label();
        self.send(&message).await?;
        let raw = timeout(bound, read_message(&mut self.reader))
            .await
            .map_err(|_| {
                SiphonRLError::Ipc(format!(
                    "no reply to {label} within {}ms",
                    bound.as_millis()
                ))
            })??;
        match decode(&raw)? {
            SiphonMessage::Error { code, message } => Err(SiphonRLError::Game { code, message }),
            reply => Ok(reply),
        }
    }

    async fn expect_ack(&mut self, message: SiphonMessage) -> Result<()> {
        let label = message.label();
        match self.request(message, self.config.request_timeout()).await? {
            SiphonMessage::Ack => Ok(()),
            other => Err(SiphonRLError::Protocol(format!(
                "{label} expected ack, got {}",
                other.label()
            ))),
        }
    }

    /// One `capture` round trip. An elapsed bound maps to `TelemetryTimeout`;
    /// frames disagreeing with the handshake capture spec are protocol
    /// errors. Deserialization fills frame fields directly, so the length
    /// check here is the one that guards the pipeline.
    async fn capture(&mut self, bound: Duration) -> Result<TelemetrySnapshot> {
        self.send(&SiphonMessage::Capture).await?;
        let raw = timeout(bound, read_message(&mut self.reader))
            .await
            .map_err(|_| {
                SiphonRLError::TelemetryTimeout(format!(
                    "no telemetry within {}ms",
                    bound.as_millis()
                ))
            })??;
        match decode(&raw)? {
            SiphonMessage::Telemetry { frame, attributes } => {
                if frame.spec() != self.ready.capture {
                    return Err(SiphonRLError::Protocol(format!(
                        "telemetry frame is {}x{}, handshake promised {}x{}",
                        frame.width, frame.height, self.ready.capture.width, self.ready.capture.height
                    )));
                }
                if frame.data.len() != self.ready.capture.byte_len() {
                    return Err(SiphonRLError::Protocol(format!(
                        "telemetry frame carries {} bytes, its spec needs {}",
                        frame.data.len(),
                        self.ready.capture.byte_len()
                    )));
                }
                Ok(TelemetrySnapshot { frame, attributes })
            }
            SiphonMessage::Error { code, message } => Err(SiphonRLError::Game { code, message }),
            other => Err(SiphonRLError::Protocol(format!(
                "capture expected telemetry, got {}",
                other.label()
            ))),
        }
    }

    /// Attribute reads outside the capture path, e.g. probing game state
    /// before a reset.
    pub async fn get_attributes(&mut self, names: &[&str]) -> Result<BTreeMap<String, AttrValue>> {
        let request = SiphonMessage::GetAttributes {
            names: names.iter().map(|n| n.to_string()).collect(),
        };
        match self.request(request, self.config.request_timeout()).await? {
            SiphonMessage::AttributeValues { values } => Ok(values),
            other => Err(SiphonRLError::Protocol(format!(
                "get_attributes expected attribute_values, got {}",
                other.label()
            ))),
        }
    }

    /// Write one memory attribute, e.g. zeroing HP to force a scenario exit
    pub async fn set_attribute(&mut self, name: &str, value: AttrValue) -> Result<()> {
        self.expect_ack(SiphonMessage::SetAttribute {
            name: name.to_string(),
            value,
        })
        .await
    }

    /// Scale the game clock; `0.0` freezes it, `1.0` is realtime
    pub async fn set_game_speed(&mut self, speed: f64) -> Result<()> {
        self.expect_ack(SiphonMessage::SetGameSpeed { speed }).await
    }

    /// Let the game render `count` frames
    pub async fn wait_frames(&mut self, count: u32) -> Result<()> {
        self.expect_ack(SiphonMessage::WaitFrames { count }).await
    }
}

#[async_trait]
impl GameInterface for SiphonClient {
    async fn send_input(&mut self, command: &ActionCommand) -> Result<()> {
        self.expect_ack(SiphonMessage::InputState {
            inputs: command.inputs.iter().cloned().collect(),
            persistent: command.persistent,
        })
        .await
    }

    async fn poll(&mut self, timeout: Duration) -> Result<TelemetrySnapshot> {
        self.capture(timeout).await
    }

    async fn skip_frames(&mut self, count: u32) -> Result<()> {
        self.wait_frames(count).await
    }

    async fn set_frozen(&mut self, frozen: bool) -> Result<()> {
        self.set_game_speed(if frozen { 0.0 } else { 1.0 }).await
    }

    async fn reset_episode(&mut self) -> Result<()> {
        let scenario = self.config.scenario.clone();
        debug!(%scenario, "restarting scenario");
        let request = SiphonMessage::ResetScenario { scenario };
        match self.request(request, self.config.reset_timeout()).await? {
            SiphonMessage::Ack => Ok(()),
            other => Err(SiphonRLError::Protocol(format!(
                "reset_scenario expected ack, got {}",
                other.label()
            ))),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.send(&SiphonMessage::Shutdown).await?;
        if let Err(err) = self.writer.shutdown().await {
            debug!(%err, "tcp close after goodbye");
        }
        Ok(())
    }
}
