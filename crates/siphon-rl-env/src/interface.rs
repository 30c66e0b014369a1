//! Game interface capability

use std::time::Duration;

use async_trait::async_trait;
use siphon_rl_core::{ActionCommand, Result, TelemetrySnapshot};

/// Capability the environment consumes to reach the live game.
///
/// Implement this to drive a game through siphon-rl. The environment core
/// never speaks the underlying transport or memory-reading protocol; it
/// issues exactly one input command and awaits exactly one fresh snapshot
/// per step. `skip_frames` and `set_frozen` default to no-ops for
/// collaborators without frame-advance or game-clock control.
#[async_trait]
pub trait GameInterface: Send {
    /// Apply an input state in the game
    async fn send_input(&mut self, command: &ActionCommand) -> Result<()>;

    /// Capture one telemetry snapshot. Must fail with `TelemetryTimeout`
    /// when the bound elapses rather than block.
    async fn poll(&mut self, timeout: Duration) -> Result<TelemetrySnapshot>;

    /// Let the game run for `count` frames before the next capture
    async fn skip_frames(&mut self, _count: u32) -> Result<()> {
        Ok(())
    }

    /// Pause or resume the game clock
    async fn set_frozen(&mut self, _frozen: bool) -> Result<()> {
        Ok(())
    }

    /// Restart the scenario for a fresh episode
    async fn reset_episode(&mut self) -> Result<()>;

    /// Called when the environment shuts down
    async fn shutdown(&mut self) -> Result<()>;
}
