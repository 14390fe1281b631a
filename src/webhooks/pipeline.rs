//! Finite state machine for a single admission request.
//!
//! Every request moves through
//! `Received → Decoded → Scanned → Decided → Responded`, with `Errored`
//! reachable from any non-terminal state. Requests that need no scan
//! (DELETE, missing object) and scans recovered by the failure policy jump
//! straight from `Decoded` or `Scanned` to `Decided`.

use std::fmt;

/// Phase of one admission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionPhase {
    /// Body received, nothing decoded yet
    Received,
    /// AdmissionReview envelope decoded
    Decoded,
    /// Scanner returned output
    Scanned,
    /// Verdict computed
    Decided,
    /// Response written (terminal)
    Responded,
    /// Error response written (terminal)
    Errored,
}

impl AdmissionPhase {
    /// Terminal phases write exactly one HTTP response and accept no events
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdmissionPhase::Responded | AdmissionPhase::Errored)
    }
}

impl fmt::Display for AdmissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionPhase::Received => write!(f, "Received"),
            AdmissionPhase::Decoded => write!(f, "Decoded"),
            AdmissionPhase::Scanned => write!(f, "Scanned"),
            AdmissionPhase::Decided => write!(f, "Decided"),
            AdmissionPhase::Responded => write!(f, "Responded"),
            AdmissionPhase::Errored => write!(f, "Errored"),
        }
    }
}

/// Events that move a request between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionEvent {
    /// Envelope deserialized and request extracted
    EnvelopeDecoded,
    /// Scanner produced a report
    ScanCompleted,
    /// No scan needed for this request
    ScanSkipped,
    /// Scan failed and the failure policy produced a verdict
    ScanFailureRecovered,
    /// Report interpreted and policy applied
    PolicyApplied,
    /// Response envelope serialized
    ResponseEncoded,
    /// Unrecoverable error for this request
    Failed,
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::EnvelopeDecoded => write!(f, "EnvelopeDecoded"),
            AdmissionEvent::ScanCompleted => write!(f, "ScanCompleted"),
            AdmissionEvent::ScanSkipped => write!(f, "ScanSkipped"),
            AdmissionEvent::ScanFailureRecovered => write!(f, "ScanFailureRecovered"),
            AdmissionEvent::PolicyApplied => write!(f, "PolicyApplied"),
            AdmissionEvent::ResponseEncoded => write!(f, "ResponseEncoded"),
            AdmissionEvent::Failed => write!(f, "Failed"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: AdmissionPhase,
    pub to: AdmissionPhase,
    pub event: AdmissionEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: AdmissionPhase,
        to: AdmissionPhase,
        event: AdmissionEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

use AdmissionEvent as E;
use AdmissionPhase as P;

static TRANSITIONS: &[Transition] = &[
    // === Received ===
    Transition::new(P::Received, P::Decoded, E::EnvelopeDecoded, "AdmissionReview decoded"),
    Transition::new(P::Received, P::Errored, E::Failed, "Malformed AdmissionReview"),
    // === Decoded ===
    Transition::new(P::Decoded, P::Scanned, E::ScanCompleted, "Scanner returned a report"),
    Transition::new(P::Decoded, P::Decided, E::ScanSkipped, "No scan required"),
    Transition::new(
        P::Decoded,
        P::Decided,
        E::ScanFailureRecovered,
        "Scanner failed, failure policy decided",
    ),
    Transition::new(P::Decoded, P::Errored, E::Failed, "Scanner failed"),
    // === Scanned ===
    Transition::new(P::Scanned, P::Decided, E::PolicyApplied, "Decision policy applied"),
    Transition::new(
        P::Scanned,
        P::Decided,
        E::ScanFailureRecovered,
        "Report unreadable, failure policy decided",
    ),
    Transition::new(P::Scanned, P::Errored, E::Failed, "Report unreadable"),
    // === Decided ===
    Transition::new(P::Decided, P::Responded, E::ResponseEncoded, "Response written"),
    Transition::new(P::Decided, P::Errored, E::Failed, "Response could not be encoded"),
    // Responded and Errored are terminal
];

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: AdmissionPhase,
        to: AdmissionPhase,
        event: AdmissionEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: AdmissionPhase,
        event: AdmissionEvent,
    },
}

/// Tracks the phase of one admission request
#[derive(Debug)]
pub struct AdmissionPipeline {
    phase: AdmissionPhase,
    history: Vec<AdmissionPhase>,
}

impl Default for AdmissionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionPipeline {
    /// Start a pipeline in `Received`
    pub fn new() -> Self {
        Self {
            phase: AdmissionPhase::Received,
            history: vec![AdmissionPhase::Received],
        }
    }

    pub fn phase(&self) -> AdmissionPhase {
        self.phase
    }

    /// Every phase visited so far, in order
    pub fn history(&self) -> &[AdmissionPhase] {
        &self.history
    }

    /// Apply an event; invalid events leave the phase unchanged
    pub fn advance(&mut self, event: AdmissionEvent) -> TransitionResult {
        match Self::find(self.phase, event) {
            Some(t) => {
                self.phase = t.to;
                self.history.push(t.to);
                TransitionResult::Success {
                    from: t.from,
                    to: t.to,
                    event,
                    description: t.description,
                }
            }
            None => TransitionResult::InvalidTransition {
                current: self.phase,
                event,
            },
        }
    }

    /// Check if a transition exists
    pub fn can_transition(from: AdmissionPhase, event: AdmissionEvent) -> bool {
        Self::find(from, event).is_some()
    }

    /// All events accepted in a phase
    pub fn valid_events(phase: AdmissionPhase) -> Vec<AdmissionEvent> {
        TRANSITIONS
            .iter()
            .filter(|t| t.from == phase)
            .map(|t| t.event)
            .collect()
    }

    fn find(from: AdmissionPhase, event: AdmissionEvent) -> Option<&'static Transition> {
        TRANSITIONS
            .iter()
            .find(|t| t.from == from && t.event == event)
    }
}
