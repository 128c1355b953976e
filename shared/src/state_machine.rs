//! Connection State Machine
//!
//! Defines the valid lifecycle transitions of the connection manager. Side
//! effects (spawning and cancelling tasks) belong to the manager; this type
//! only decides which state a trigger leads to.

use crate::ConnectionState;

/// Triggers that can move the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Caller asked to (re)start listening
    Start,
    /// Caller asked to dial a peer
    Connect,
    /// Listener or dialer produced an established stream
    Established,
    /// The dial attempt failed
    DialFailed,
    /// The active session's stream failed
    StreamLost,
    /// The listener could not bind or accept
    ListenFailed,
    /// Caller asked to tear everything down
    Stop,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid; `from` and `to` may be equal
    Success {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Trigger is not meaningful in the current state; state unchanged
    Invalid {
        from: ConnectionState,
        trigger: Trigger,
    },
}

/// The connection lifecycle state machine
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process a trigger and return the transition result
    pub fn process(&mut self, trigger: Trigger) -> TransitionResult {
        let from = self.current_state;

        match self.next_state(trigger) {
            Some(to) => {
                self.current_state = to;
                TransitionResult::Success { from, to }
            }
            None => TransitionResult::Invalid { from, trigger },
        }
    }

    /// Get the next state for a trigger, if the transition is valid
    fn next_state(&self, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Trigger::*;

        match (self.current_state, trigger) {
            (_, Start) => Some(Listening),
            (_, Connect) => Some(Connecting),
            (Listening | Connecting, Established) => Some(Connected),
            (_, DialFailed) => Some(Listening),
            (Connected, StreamLost) => Some(Listening),

            // Nothing is left running once a lone listener dies
            (Listening, ListenFailed) => Some(Idle),
            (Connecting, ListenFailed) => Some(Connecting),

            (_, Stop) => Some(Idle),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn reached(result: TransitionResult) -> ConnectionState {
        match result {
            TransitionResult::Success { to, .. } => to,
            TransitionResult::Invalid { from, trigger } => {
                panic!("unexpected invalid transition {:?} from {:?}", trigger, from)
            }
        }
    }

    #[test]
    fn test_initial_state() {
        let fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.state(), Idle);
    }

    #[test]
    fn test_outbound_session_flow() {
        let mut fsm = ConnectionStateMachine::new();

        assert_eq!(reached(fsm.process(Trigger::Start)), Listening);
        assert_eq!(reached(fsm.process(Trigger::Connect)), Connecting);
        assert_eq!(reached(fsm.process(Trigger::Established)), Connected);
        assert_eq!(reached(fsm.process(Trigger::StreamLost)), Listening);
        assert_eq!(reached(fsm.process(Trigger::Stop)), Idle);
    }

    #[test]
    fn test_dial_failure_returns_to_listening() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process(Trigger::Connect);

        let result = fsm.process(Trigger::DialFailed);
        assert_eq!(
            result,
            TransitionResult::Success {
                from: Connecting,
                to: Listening
            }
        );
    }

    #[test]
    fn test_established_requires_pending_attempt() {
        let mut fsm = ConnectionStateMachine::new();

        let result = fsm.process(Trigger::Established);
        assert!(matches!(result, TransitionResult::Invalid { from: Idle, .. }));
        assert_eq!(fsm.state(), Idle);

        fsm.process(Trigger::Start);
        fsm.process(Trigger::Established);
        let result = fsm.process(Trigger::Established);
        assert!(matches!(result, TransitionResult::Invalid { from: Connected, .. }));
    }

    #[test]
    fn test_stream_lost_only_while_connected() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process(Trigger::Start);

        let result = fsm.process(Trigger::StreamLost);
        assert!(matches!(result, TransitionResult::Invalid { from: Listening, .. }));
    }

    #[test]
    fn test_listen_failure() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process(Trigger::Start);
        assert_eq!(reached(fsm.process(Trigger::ListenFailed)), Idle);

        // A dial in flight keeps the manager connecting
        fsm.process(Trigger::Connect);
        assert_eq!(reached(fsm.process(Trigger::ListenFailed)), Connecting);

        fsm.process(Trigger::Established);
        let result = fsm.process(Trigger::ListenFailed);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn test_stop_from_any_state() {
        for trigger in [Trigger::Start, Trigger::Connect] {
            let mut fsm = ConnectionStateMachine::new();
            fsm.process(trigger);
            assert_eq!(reached(fsm.process(Trigger::Stop)), Idle);
        }
    }
}
