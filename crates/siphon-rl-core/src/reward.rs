//! Reward strategies

use serde::{Deserialize, Serialize};

use crate::observation::{Observation, StepInfo};

/// Pluggable reward and termination policy. Implementations are pure with
/// respect to the episode: they may carry configuration (weights), never
/// snapshots. The episode tracker owns prev/current state and supplies all
/// deltas through `StepInfo`.
pub trait RewardStrategy: Send + Sync {
    /// Scalar reward for the transition that produced `info`.
    /// `previous` is `None` exactly on the first step after reset.
    fn compute(&self, observation: &Observation, info: &StepInfo, previous: Option<&StepInfo>)
    -> f64;

    /// Game-specific extra termination, OR-ed with the tracker's built-in
    /// win/loss/timeout predicate
    fn is_terminal(&self, _observation: &Observation, _info: &StepInfo) -> bool {
        false
    }
}

/// Default strategy: weighted difference of the tracker's normalized damage
/// deltas, `dealt * dealt_weight - taken * taken_weight`. Returns 0.0 on the
/// first step of an episode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreDeltaReward {
    #[serde(default = "default_weight")]
    pub dealt_weight: f64,
    #[serde(default = "default_weight")]
    pub taken_weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for ScoreDeltaReward {
    fn default() -> Self {
        Self {
            dealt_weight: 1.0,
            taken_weight: 1.0,
        }
    }
}

impl ScoreDeltaReward {
    pub fn new(dealt_weight: f64, taken_weight: f64) -> Self {
        Self {
            dealt_weight,
            taken_weight,
        }
    }
}

impl RewardStrategy for ScoreDeltaReward {
    fn compute(
        &self,
        _observation: &Observation,
        info: &StepInfo,
        previous: Option<&StepInfo>,
    ) -> f64 {
        if previous.is_none() {
            return 0.0;
        }
        info.boss_damage_dealt_normalized * self.dealt_weight
            - info.player_damage_taken_normalized * self.taken_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(dealt_norm: f64, taken_norm: f64) -> StepInfo {
        StepInfo {
            boss_damage_dealt_normalized: dealt_norm,
            player_damage_taken_normalized: taken_norm,
            ..StepInfo::default()
        }
    }

    #[test]
    fn first_step_reward_is_zero() {
        let strategy = ScoreDeltaReward::default();
        let obs = Observation::new();
        let current = info(0.3, 0.1);
        assert_eq!(strategy.compute(&obs, &current, None), 0.0);
    }

    #[test]
    fn weighted_delta_after_first_step() {
        let strategy = ScoreDeltaReward::new(2.0, 0.5);
        let obs = Observation::new();
        let prev = info(0.0, 0.0);
        let current = info(0.3, 0.1);
        let reward = strategy.compute(&obs, &current, Some(&prev));
        assert!((reward - (0.3 * 2.0 - 0.1 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn default_is_terminal_defers_to_tracker() {
        let strategy = ScoreDeltaReward::default();
        assert!(!strategy.is_terminal(&Observation::new(), &StepInfo::default()));
    }
}
