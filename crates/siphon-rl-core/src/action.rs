//! Agent actions, action spaces, and resolved input commands

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiphonRLError};

/// An action chosen by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AgentAction {
    /// Index into the discrete action table
    Discrete(usize),
    /// One 0/1 entry per input identifier
    MultiBinary(Vec<u8>),
}

/// One named entry of a discrete action table: an action id mapped to the
/// input identifiers pressed together (e.g. `sprint_forward` = shift+w)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionBinding {
    /// Action name
    pub name: String,
    /// Input identifiers active while this action is held
    pub inputs: Vec<String>,
}

impl ActionBinding {
    pub fn new(name: impl Into<String>, inputs: &[&str]) -> Self {
        Self {
            name: name.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// The action-space mode agent actions are validated against
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ActionSpace {
    /// Fixed table of named input patterns, selected by index
    Discrete { actions: Vec<ActionBinding> },
    /// Independent bits, one per input identifier
    MultiBinary { inputs: Vec<String> },
}

impl ActionSpace {
    /// Number of discrete actions or binary dimensions
    pub fn size(&self) -> usize {
        match self {
            ActionSpace::Discrete { actions } => actions.len(),
            ActionSpace::MultiBinary { inputs } => inputs.len(),
        }
    }

    /// Construction-time sanity check
    pub fn validate(&self) -> Result<()> {
        if self.size() == 0 {
            return Err(SiphonRLError::InvalidConfiguration(
                "action space must declare at least one action".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves an agent action to the set of inputs it wants active.
    /// Pure: dispatcher state is untouched until the command is committed.
    pub fn resolve(&self, action: &AgentAction) -> Result<BTreeSet<String>> {
        match (self, action) {
            (ActionSpace::Discrete { actions }, AgentAction::Discrete(index)) => {
                let binding = actions.get(*index).ok_or_else(|| {
                    SiphonRLError::InvalidAction(format!(
                        "discrete index {} out of range for table of {}",
                        index,
                        actions.len()
                    ))
                })?;
                Ok(binding.inputs.iter().cloned().collect())
            }
            (ActionSpace::MultiBinary { inputs }, AgentAction::MultiBinary(bits)) => {
                if bits.len() != inputs.len() {
                    return Err(SiphonRLError::InvalidAction(format!(
                        "multi_binary vector has {} entries, space has {}",
                        bits.len(),
                        inputs.len()
                    )));
                }
                let mut active = BTreeSet::new();
                for (bit, input) in bits.iter().zip(inputs) {
                    match bit {
                        0 => {}
                        1 => {
                            active.insert(input.clone());
                        }
                        other => {
                            return Err(SiphonRLError::InvalidAction(format!(
                                "multi_binary entry for '{input}' is {other}, expected 0 or 1"
                            )));
                        }
                    }
                }
                Ok(active)
            }
            (ActionSpace::Discrete { .. }, AgentAction::MultiBinary(_)) => {
                Err(SiphonRLError::InvalidAction(
                    "multi_binary action given to a discrete space".to_string(),
                ))
            }
            (ActionSpace::MultiBinary { .. }, AgentAction::Discrete(_)) => {
                Err(SiphonRLError::InvalidAction(
                    "discrete action given to a multi_binary space".to_string(),
                ))
            }
        }
    }

    /// The stock 16-action keyboard/mouse table for third-person action
    /// games driven through the siphon tap
    pub fn default_keyboard() -> Self {
        ActionSpace::Discrete {
            actions: vec![
                ActionBinding::new("noop", &[]),
                ActionBinding::new("move_forward", &["w"]),
                ActionBinding::new("move_backward", &["s"]),
                ActionBinding::new("move_left", &["a"]),
                ActionBinding::new("move_right", &["d"]),
                ActionBinding::new("dodge", &["space"]),
                ActionBinding::new("sprint", &["shift"]),
                ActionBinding::new("sprint_forward", &["shift", "w"]),
                ActionBinding::new("sprint_backward", &["shift", "s"]),
                ActionBinding::new("sprint_left", &["shift", "a"]),
                ActionBinding::new("sprint_right", &["shift", "d"]),
                ActionBinding::new("interact", &["e"]),
                ActionBinding::new("attack", &["lmb"]),
                ActionBinding::new("guard", &["rmb"]),
                ActionBinding::new("lock_on", &["mmb"]),
                ActionBinding::new("use_item", &["r"]),
            ],
        }
    }
}

/// Resolved input state sent to the game: which inputs are active and
/// whether the collaborator holds them past this step. Built per step (or
/// per change, under persistence), sent once, never retained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionCommand {
    pub inputs: BTreeSet<String>,
    pub persistent: bool,
}

impl ActionCommand {
    pub fn new(inputs: BTreeSet<String>, persistent: bool) -> Self {
        Self { inputs, persistent }
    }

    /// Command releasing every input
    pub fn release_all(persistent: bool) -> Self {
        Self {
            inputs: BTreeSet::new(),
            persistent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_resolves_to_binding_inputs() {
        let space = ActionSpace::default_keyboard();
        let active = space.resolve(&AgentAction::Discrete(7)).unwrap();
        assert_eq!(
            active,
            BTreeSet::from(["shift".to_string(), "w".to_string()])
        );
        assert!(space.resolve(&AgentAction::Discrete(0)).unwrap().is_empty());
    }

    #[test]
    fn discrete_out_of_range_is_invalid_action() {
        let space = ActionSpace::default_keyboard();
        let err = space.resolve(&AgentAction::Discrete(16)).unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidAction(_)), "{err}");
    }

    #[test]
    fn multi_binary_maps_bits_to_inputs() {
        let space = ActionSpace::MultiBinary {
            inputs: vec!["w".into(), "space".into(), "lmb".into()],
        };
        let active = space
            .resolve(&AgentAction::MultiBinary(vec![1, 0, 1]))
            .unwrap();
        assert_eq!(active, BTreeSet::from(["w".to_string(), "lmb".to_string()]));
    }

    #[test]
    fn multi_binary_rejects_non_binary_values() {
        let space = ActionSpace::MultiBinary {
            inputs: vec!["w".into(), "space".into()],
        };
        let err = space
            .resolve(&AgentAction::MultiBinary(vec![1, 2]))
            .unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidAction(_)), "{err}");
    }

    #[test]
    fn multi_binary_rejects_length_mismatch() {
        let space = ActionSpace::MultiBinary {
            inputs: vec!["w".into(), "space".into()],
        };
        let err = space
            .resolve(&AgentAction::MultiBinary(vec![1]))
            .unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidAction(_)), "{err}");
    }

    #[test]
    fn mode_mismatch_is_invalid_action() {
        let space = ActionSpace::default_keyboard();
        let err = space
            .resolve(&AgentAction::MultiBinary(vec![0; 16]))
            .unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidAction(_)), "{err}");
    }

    #[test]
    fn action_space_mode_tag_round_trips() {
        let space = ActionSpace::MultiBinary {
            inputs: vec!["w".into()],
        };
        let json = serde_json::to_string(&space).unwrap();
        assert!(json.contains("\"mode\":\"multi_binary\""), "{json}");
        let back: ActionSpace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, space);
    }
}
