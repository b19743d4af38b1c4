//! Keyframe gate
//!
//! Decides, packet by packet, whether a session forwards media and whether
//! the liveness deadline is re-armed.
//!
//! ```text
//!   AwaitingKeyframe ──keyframe──► Streaming ──close──► Closed
//!          │                                              ▲
//!          └───────────────────close──────────────────────┘
//! ```
//!
//! Audio-only sessions start in `Streaming` and every packet counts as
//! activity.

/// Gate state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Discarding packets until the first keyframe
    AwaitingKeyframe,
    /// Forwarding packets
    Streaming,
    /// Terminal
    Closed,
}

/// What to do with one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Forward the packet (subject to track filtering)
    pub forward: bool,
    /// Push the liveness deadline out by a full window
    pub rearm: bool,
}

impl Verdict {
    const DISCARD: Verdict = Verdict {
        forward: false,
        rearm: false,
    };
}

#[derive(Debug, Clone)]
pub struct KeyframeGate {
    state: GateState,
    audio_only: bool,
}

impl KeyframeGate {
    pub fn new(audio_only: bool) -> Self {
        Self {
            state: if audio_only {
                GateState::Streaming
            } else {
                GateState::AwaitingKeyframe
            },
            audio_only,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == GateState::Closed
    }

    /// Feed one packet through the gate
    pub fn on_packet(&mut self, is_keyframe: bool) -> Verdict {
        let activity = is_keyframe || self.audio_only;
        match self.state {
            GateState::Closed => Verdict::DISCARD,
            GateState::AwaitingKeyframe if activity => {
                self.state = GateState::Streaming;
                Verdict {
                    forward: true,
                    rearm: true,
                }
            }
            GateState::AwaitingKeyframe => Verdict::DISCARD,
            GateState::Streaming => Verdict {
                forward: true,
                rearm: activity,
            },
        }
    }

    /// Move to `Closed`. Returns true only for the first call.
    pub fn close(&mut self) -> bool {
        if self.state == GateState::Closed {
            return false;
        }
        self.state = GateState::Closed;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discards_until_keyframe() {
        let mut gate = KeyframeGate::new(false);
        assert_eq!(gate.state(), GateState::AwaitingKeyframe);

        for _ in 0..3 {
            assert_eq!(gate.on_packet(false), Verdict::DISCARD);
        }
        assert_eq!(gate.state(), GateState::AwaitingKeyframe);

        let verdict = gate.on_packet(true);
        assert!(verdict.forward && verdict.rearm);
        assert_eq!(gate.state(), GateState::Streaming);

        let verdict = gate.on_packet(false);
        assert!(verdict.forward);
        assert!(!verdict.rearm);
        assert!(gate.on_packet(true).rearm);
    }

    #[test]
    fn test_audio_only_forwards_first_packet() {
        let mut gate = KeyframeGate::new(true);
        assert_eq!(gate.state(), GateState::Streaming);

        let verdict = gate.on_packet(false);
        assert!(verdict.forward);
        assert!(verdict.rearm);
    }

    #[test]
    fn test_close_is_terminal_and_once() {
        let mut gate = KeyframeGate::new(false);
        gate.on_packet(true);

        assert!(gate.close());
        assert!(!gate.close());
        assert!(gate.is_closed());
        assert_eq!(gate.on_packet(true), Verdict::DISCARD);
    }
}
