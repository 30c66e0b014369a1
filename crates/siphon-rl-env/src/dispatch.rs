//! Action dispatch state machine

use std::collections::BTreeSet;

use siphon_rl_core::{ActionCommand, ActionSpace, AgentAction, Result};

/// Outcome of resolving one agent action against the currently held input
/// state. Carries the command to send (if any) plus the desired set that
/// becomes the new memory once `commit` runs; dropping it without commit
/// leaves the dispatcher exactly as before, so a failed send cannot desync
/// the active-set memory from the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDispatch {
    /// Command for this step. `None` when persistence is on and the game
    /// already holds exactly the desired set.
    pub command: Option<ActionCommand>,
    desired: BTreeSet<String>,
}

/// Turns agent actions into input-state commands, honoring persistence.
///
/// With persistence on, an input stays active across steps until a command
/// no longer includes it; only changes in the active set produce events.
/// With persistence off, the full desired state is re-issued every step and
/// the collaborator holds it for that step's duration only.
#[derive(Debug)]
pub struct ActionDispatcher {
    space: ActionSpace,
    persistence: bool,
    active: BTreeSet<String>,
}

impl ActionDispatcher {
    pub fn new(space: ActionSpace, persistence: bool) -> Self {
        Self {
            space,
            persistence,
            active: BTreeSet::new(),
        }
    }

    /// Validates the action and diffs the desired input set against the
    /// held one. Pure with respect to dispatcher state.
    pub fn prepare(&self, action: &AgentAction) -> Result<PendingDispatch> {
        let desired = self.space.resolve(action)?;
        let command = if self.persistence {
            if desired == self.active {
                None
            } else {
                Some(ActionCommand::new(desired.clone(), true))
            }
        } else {
            Some(ActionCommand::new(desired.clone(), false))
        };
        Ok(PendingDispatch { command, desired })
    }

    /// Adopts the desired set as the new held state. Call only after the
    /// command (when present) was acknowledged.
    pub fn commit(&mut self, pending: PendingDispatch) {
        self.active = pending.desired;
    }

    /// `prepare` + `commit` in one call, for hosts with infallible delivery
    pub fn dispatch(&mut self, action: &AgentAction) -> Result<Option<ActionCommand>> {
        let pending = self.prepare(action)?;
        let command = pending.command.clone();
        self.commit(pending);
        Ok(command)
    }

    /// Drops every held input at episode boundaries. Returns the release
    /// command to send when the game still holds keys, `None` otherwise.
    pub fn release(&mut self) -> Option<ActionCommand> {
        let held = !self.active.is_empty();
        self.active.clear();
        if self.persistence && held {
            Some(ActionCommand::release_all(true))
        } else {
            None
        }
    }

    /// Inputs the game currently holds, as far as the dispatcher knows
    pub fn active_inputs(&self) -> &BTreeSet<String> {
        &self.active
    }

    pub fn space(&self) -> &ActionSpace {
        &self.space
    }

    pub fn persistence(&self) -> bool {
        self.persistence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_rl_core::SiphonRLError;

    fn set(inputs: &[&str]) -> BTreeSet<String> {
        inputs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn persistent_repeat_emits_single_event() {
        let mut dispatcher = ActionDispatcher::new(ActionSpace::default_keyboard(), true);
        let mut events = 0;
        for _ in 0..5 {
            if let Some(command) = dispatcher.dispatch(&AgentAction::Discrete(7)).unwrap() {
                assert_eq!(command.inputs, set(&["shift", "w"]));
                assert!(command.persistent);
                events += 1;
            }
        }
        assert_eq!(events, 1);
    }

    #[test]
    fn non_persistent_reissues_every_step() {
        let mut dispatcher = ActionDispatcher::new(ActionSpace::default_keyboard(), false);
        let mut events = 0;
        for _ in 0..5 {
            let command = dispatcher
                .dispatch(&AgentAction::Discrete(1))
                .unwrap()
                .expect("full state every step");
            assert_eq!(command.inputs, set(&["w"]));
            assert!(!command.persistent);
            events += 1;
        }
        assert_eq!(events, 5);
    }

    #[test]
    fn persistent_change_sends_new_full_state() {
        let mut dispatcher = ActionDispatcher::new(ActionSpace::default_keyboard(), true);
        dispatcher.dispatch(&AgentAction::Discrete(7)).unwrap();
        let command = dispatcher
            .dispatch(&AgentAction::Discrete(8))
            .unwrap()
            .expect("changed set must emit");
        assert_eq!(command.inputs, set(&["s", "shift"]));
        assert_eq!(*dispatcher.active_inputs(), set(&["s", "shift"]));
    }

    #[test]
    fn invalid_action_leaves_state_untouched() {
        let mut dispatcher = ActionDispatcher::new(ActionSpace::default_keyboard(), true);
        dispatcher.dispatch(&AgentAction::Discrete(1)).unwrap();
        let err = dispatcher.dispatch(&AgentAction::Discrete(99)).unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidAction(_)));
        assert_eq!(*dispatcher.active_inputs(), set(&["w"]));
        // The held set still diffs correctly afterwards
        assert!(
            dispatcher
                .dispatch(&AgentAction::Discrete(1))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn uncommitted_prepare_has_no_effect() {
        let mut dispatcher = ActionDispatcher::new(ActionSpace::default_keyboard(), true);
        let pending = dispatcher.prepare(&AgentAction::Discrete(5)).unwrap();
        assert!(pending.command.is_some());
        drop(pending); // send failed, nothing committed

        let retry = dispatcher.prepare(&AgentAction::Discrete(5)).unwrap();
        let command = retry.command.clone().expect("still a change");
        assert_eq!(command.inputs, set(&["space"]));
        dispatcher.commit(retry);
        assert_eq!(*dispatcher.active_inputs(), set(&["space"]));
    }

    #[test]
    fn release_drops_held_inputs_once() {
        let mut dispatcher = ActionDispatcher::new(ActionSpace::default_keyboard(), true);
        dispatcher.dispatch(&AgentAction::Discrete(7)).unwrap();

        let release = dispatcher.release().expect("keys held");
        assert!(release.inputs.is_empty());
        assert!(dispatcher.active_inputs().is_empty());
        assert!(dispatcher.release().is_none());
    }

    #[test]
    fn release_without_persistence_sends_nothing() {
        let mut dispatcher = ActionDispatcher::new(ActionSpace::default_keyboard(), false);
        dispatcher.dispatch(&AgentAction::Discrete(7)).unwrap();
        assert!(dispatcher.release().is_none());
    }

    #[test]
    fn multi_binary_dispatch() {
        let space = ActionSpace::MultiBinary {
            inputs: vec!["w".into(), "space".into(), "lmb".into()],
        };
        let mut dispatcher = ActionDispatcher::new(space, true);
        let command = dispatcher
            .dispatch(&AgentAction::MultiBinary(vec![1, 1, 0]))
            .unwrap()
            .unwrap();
        assert_eq!(command.inputs, set(&["space", "w"]));
        assert!(
            dispatcher
                .dispatch(&AgentAction::MultiBinary(vec![1, 1, 0]))
                .unwrap()
                .is_none()
        );
    }
}
