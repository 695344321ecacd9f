//! Feed lifecycle state machine using rust-fsm.
//!
//! ```text
//!  Idle ── Start ──► Subscribing ── SubscriptionActive ──► Loading ── SnapshotLoaded ──► Ready
//!                        │                                    │                            │
//!                        │ SubscriptionFailed      QueryFailed / SubscriptionLost   SubscriptionLost
//!                        ▼                                    ▼                            ▼
//!                      Failed ◄───────────────────────────────┴────────────────────────────┘
//!                        │ Start
//!                        ▼
//!                   Subscribing
//! ```
//!
//! Every state accepts `Stop`, which ends in `Stopped`; a stopped feed can
//! be started again.

use rust_fsm::*;
use serde::Serialize;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub feed_machine(Idle)

    Idle => {
        Start => Subscribing,
        Stop => Stopped
    },
    Subscribing => {
        SubscriptionActive => Loading,
        SubscriptionFailed => Failed,
        Stop => Stopped
    },
    Loading => {
        SnapshotLoaded => Ready,
        QueryFailed => Failed,
        SubscriptionLost => Failed,
        Stop => Stopped
    },
    Ready => {
        SubscriptionLost => Failed,
        Stop => Stopped
    },
    Failed => {
        Start => Subscribing,
        Stop => Stopped
    },
    Stopped => {
        Start => Subscribing
    }
}

pub use feed_machine::Input as FeedMachineInput;
pub use feed_machine::State as FeedMachineState;
pub use feed_machine::StateMachine as FeedMachine;

/// Coarse phase of a feed run, for logs and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPhase {
    Idle,
    Subscribing,
    Loading,
    Ready,
    Failed,
    Stopped,
}

impl FeedPhase {
    /// True while the run may still change the post list.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            FeedPhase::Subscribing | FeedPhase::Loading | FeedPhase::Ready
        )
    }
}

impl From<&FeedMachineState> for FeedPhase {
    fn from(state: &FeedMachineState) -> Self {
        match state {
            FeedMachineState::Idle => FeedPhase::Idle,
            FeedMachineState::Subscribing => FeedPhase::Subscribing,
            FeedMachineState::Loading => FeedPhase::Loading,
            FeedMachineState::Ready => FeedPhase::Ready,
            FeedMachineState::Failed => FeedPhase::Failed,
            FeedMachineState::Stopped => FeedPhase::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(inputs: &[FeedMachineInput]) -> FeedMachine {
        let mut machine = FeedMachine::new();
        for input in inputs {
            machine.consume(input).unwrap();
        }
        machine
    }

    #[test]
    fn happy_path_reaches_ready() {
        let machine = drive(&[
            FeedMachineInput::Start,
            FeedMachineInput::SubscriptionActive,
            FeedMachineInput::SnapshotLoaded,
        ]);
        assert_eq!(*machine.state(), FeedMachineState::Ready);
        assert_eq!(FeedPhase::from(machine.state()), FeedPhase::Ready);
    }

    #[test]
    fn cannot_load_before_subscription_is_active() {
        let mut machine = drive(&[FeedMachineInput::Start]);
        assert!(machine.consume(&FeedMachineInput::SnapshotLoaded).is_err());
        assert_eq!(*machine.state(), FeedMachineState::Subscribing);
    }

    #[test]
    fn query_failure_is_terminal_until_restart() {
        let mut machine = drive(&[
            FeedMachineInput::Start,
            FeedMachineInput::SubscriptionActive,
            FeedMachineInput::QueryFailed,
        ]);
        assert_eq!(*machine.state(), FeedMachineState::Failed);
        assert!(machine.consume(&FeedMachineInput::SnapshotLoaded).is_err());

        machine.consume(&FeedMachineInput::Start).unwrap();
        assert_eq!(*machine.state(), FeedMachineState::Subscribing);
    }

    #[test]
    fn subscription_lost_after_ready() {
        let machine = drive(&[
            FeedMachineInput::Start,
            FeedMachineInput::SubscriptionActive,
            FeedMachineInput::SnapshotLoaded,
            FeedMachineInput::SubscriptionLost,
        ]);
        assert_eq!(*machine.state(), FeedMachineState::Failed);
    }

    #[test]
    fn stop_from_any_running_state() {
        for prefix in [
            vec![],
            vec![FeedMachineInput::Start],
            vec![FeedMachineInput::Start, FeedMachineInput::SubscriptionActive],
            vec![
                FeedMachineInput::Start,
                FeedMachineInput::SubscriptionActive,
                FeedMachineInput::SnapshotLoaded,
            ],
        ] {
            let mut machine = drive(&prefix);
            machine.consume(&FeedMachineInput::Stop).unwrap();
            assert_eq!(*machine.state(), FeedMachineState::Stopped);
        }
    }

    #[test]
    fn stopped_feed_ignores_late_inputs() {
        let mut machine = drive(&[FeedMachineInput::Start, FeedMachineInput::Stop]);
        assert!(machine.consume(&FeedMachineInput::SubscriptionActive).is_err());
        assert!(machine.consume(&FeedMachineInput::SnapshotLoaded).is_err());
        assert!(!FeedPhase::from(machine.state()).is_live());
    }
}
