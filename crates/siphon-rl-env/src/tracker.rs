//! Episode accounting: damage deltas, HP refunds and the termination verdict

use std::collections::BTreeMap;

use siphon_rl_core::{AttrValue, EpisodeSummary, Result, SiphonRLError, TelemetrySnapshot};

use crate::config::{HealthBindings, RefundPolicy};

/// Termination predicate outcome for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Boss raw HP reached zero
    Won,
    /// Player raw HP reached zero
    Lost,
    /// Step-count limit reached with no game-state outcome
    TimedOut,
}

impl Verdict {
    /// True for game-state outcomes, never for the step cap
    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Won | Verdict::Lost)
    }
}

/// Everything one snapshot contributes to the episode, computed without
/// touching tracker state. Field names mirror the step info record. Damage
/// and verdict always derive from raw HP; the `player_hp`/`boss_hp` fields
/// and `reported_attributes` carry the refund rewrite when one is active.
#[derive(Debug, Clone)]
pub struct StepAccounting {
    /// Index this step will hold once committed (reset record is 0)
    pub step: u64,
    pub player_hp: f64,
    pub player_max_hp: f64,
    pub player_hp_normalized: f64,
    pub boss_hp: f64,
    pub boss_max_hp: f64,
    pub boss_hp_normalized: f64,
    pub player_damage_taken: f64,
    pub player_damage_taken_normalized: f64,
    pub boss_damage_dealt: f64,
    pub boss_damage_dealt_normalized: f64,
    /// Cumulative refund through this step
    pub player_hp_refunded: f64,
    pub boss_hp_refunded: f64,
    /// Snapshot attributes with refunded HP rewritten
    pub reported_attributes: BTreeMap<String, AttrValue>,
    pub verdict: Verdict,
}

/// Damage, refund and termination bookkeeping for one episode.
///
/// Split into a pure [`account`](EpisodeTracker::account) that inspects a
/// snapshot and a [`commit`](EpisodeTracker::commit) that records it, so a
/// step that fails between the two leaves no trace. A tracker is built
/// fresh at every reset; the first accounted step therefore has no previous
/// snapshot and reports zero deltas.
pub struct EpisodeTracker {
    health: HealthBindings,
    refund: RefundPolicy,
    max_steps: Option<u64>,
    prev: Option<TelemetrySnapshot>,
    step: u64,
    total_reward: f64,
    player_refund_total: f64,
    boss_refund_total: f64,
    taken_normalized_total: f64,
    dealt_normalized_total: f64,
    verdict: Verdict,
}

impl EpisodeTracker {
    pub fn new(health: HealthBindings, refund: RefundPolicy, max_steps: Option<u64>) -> Self {
        Self {
            health,
            refund,
            max_steps,
            prev: None,
            step: 0,
            total_reward: 0.0,
            player_refund_total: 0.0,
            boss_refund_total: 0.0,
            taken_normalized_total: 0.0,
            dealt_normalized_total: 0.0,
            verdict: Verdict::Continue,
        }
    }

    /// Steps committed so far
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    fn required(&self, snapshot: &TelemetrySnapshot, name: &str) -> Result<f64> {
        snapshot.attribute(name).ok_or_else(|| {
            SiphonRLError::Protocol(format!("telemetry is missing required attribute '{name}'"))
        })
    }

    /// Accounts one snapshot against the previous step without recording
    /// anything. Errors when a bound HP attribute is absent.
    pub fn account(&self, snapshot: &TelemetrySnapshot) -> Result<StepAccounting> {
        let player_raw = self.required(snapshot, &self.health.player_hp)?;
        let player_max = self.required(snapshot, &self.health.player_max_hp)?;
        let boss_raw = self.required(snapshot, &self.health.boss_hp)?;
        let boss_max = self.required(snapshot, &self.health.boss_max_hp)?;

        let (damage_taken, damage_dealt) = match &self.prev {
            Some(prev) => {
                let prev_player = self.required(prev, &self.health.player_hp)?;
                let prev_boss = self.required(prev, &self.health.boss_hp)?;
                // Healing and phase refills never count as negative damage
                (
                    (prev_player - player_raw).max(0.0),
                    (prev_boss - boss_raw).max(0.0),
                )
            }
            None => (0.0, 0.0),
        };

        let player_refunded = self.player_refund_total
            + if self.refund.player { damage_taken } else { 0.0 };
        let boss_refunded =
            self.boss_refund_total + if self.refund.boss { damage_dealt } else { 0.0 };

        let player_hp = if self.refund.player {
            restore(player_raw, player_refunded, player_max)
        } else {
            player_raw
        };
        let boss_hp = if self.refund.boss {
            restore(boss_raw, boss_refunded, boss_max)
        } else {
            boss_raw
        };

        let mut reported_attributes = snapshot.attributes.clone();
        if self.refund.player {
            reported_attributes.insert(self.health.player_hp.clone(), AttrValue::Float(player_hp));
        }
        if self.refund.boss {
            reported_attributes.insert(self.health.boss_hp.clone(), AttrValue::Float(boss_hp));
        }

        // Win/loss always reads raw HP. A refunded dimension skips its
        // check only when the policy says so; rewriting what downstream
        // sees and suppressing the outcome are separate switches.
        let suppress_player = self.refund.player && self.refund.suppresses_termination;
        let suppress_boss = self.refund.boss && self.refund.suppresses_termination;
        let verdict = if boss_raw <= 0.0 && !suppress_boss {
            Verdict::Won
        } else if player_raw <= 0.0 && !suppress_player {
            Verdict::Lost
        } else if self.max_steps.is_some_and(|m| self.step + 1 >= m) {
            Verdict::TimedOut
        } else {
            Verdict::Continue
        };

        Ok(StepAccounting {
            step: self.step + 1,
            player_hp,
            player_max_hp: player_max,
            player_hp_normalized: normalized(player_hp, player_max),
            boss_hp,
            boss_max_hp: boss_max,
            boss_hp_normalized: normalized(boss_hp, boss_max),
            player_damage_taken: damage_taken,
            player_damage_taken_normalized: normalized(damage_taken, player_max),
            boss_damage_dealt: damage_dealt,
            boss_damage_dealt_normalized: normalized(damage_dealt, boss_max),
            player_hp_refunded: player_refunded,
            boss_hp_refunded: boss_refunded,
            reported_attributes,
            verdict,
        })
    }

    /// Records an accounted step. Called once per step, only after every
    /// fallible stage of the step has succeeded.
    pub fn commit(&mut self, snapshot: TelemetrySnapshot, accounting: &StepAccounting, reward: f64) {
        self.prev = Some(snapshot);
        self.step = accounting.step;
        self.total_reward += reward;
        self.player_refund_total = accounting.player_hp_refunded;
        self.boss_refund_total = accounting.boss_hp_refunded;
        self.taken_normalized_total += accounting.player_damage_taken_normalized;
        self.dealt_normalized_total += accounting.boss_damage_dealt_normalized;
        self.verdict = accounting.verdict;
    }

    /// Episode totals as of the last committed step
    pub fn summary(&self) -> EpisodeSummary {
        EpisodeSummary {
            length: self.step,
            total_reward: self.total_reward,
            victory: self.verdict == Verdict::Won,
            boss_damage_dealt_normalized: self.dealt_normalized_total,
            player_damage_taken_normalized: self.taken_normalized_total,
        }
    }
}

fn normalized(amount: f64, max: f64) -> f64 {
    if max > 0.0 { amount / max } else { 0.0 }
}

/// Refund rewrite: raw HP plus everything refunded so far, kept in
/// `[0, max]`. `min` before `max` so a non-positive max reports zero
/// instead of panicking.
fn restore(raw: f64, refunded: f64, max: f64) -> f64 {
    (raw + refunded).min(max).max(0.0)
}
