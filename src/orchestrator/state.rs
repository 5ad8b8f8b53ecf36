//! Per-request diagnosis state machine.
//!
//! A request moves `Received -> Stored -> Classifying -> Completed`, and can
//! drop to `Failed` from any of the non-terminal states. Each state is its own
//! type, so only legal transitions exist as methods; the visited states are
//! recorded for the outcome.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::base::{
    error::{DiagnosisError, ErrorKind},
    types::{BotSession, DiagnosisResult, ImageSubmission, StoredObjectRef},
};

/// Diagnosis request states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisState {
    /// The submission was accepted.
    Received,
    /// The image is in the blob store.
    Stored,
    /// A bot session is open and the image is being classified.
    Classifying,
    /// A diagnosis result was produced.
    Completed,
    /// The request ended with an error.
    Failed,
}

impl DiagnosisState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for DiagnosisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Stored => write!(f, "stored"),
            Self::Classifying => write!(f, "classifying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// State payloads.

pub struct Received;

pub struct Stored {
    object: StoredObjectRef,
}

pub struct Classifying {
    object: StoredObjectRef,
    session: BotSession,
}

/// Behavior shared by the non-terminal states.
pub trait ActiveState {
    const STATE: DiagnosisState;

    /// The object written so far, if any.
    fn into_object(self) -> Option<StoredObjectRef>;
}

impl ActiveState for Received {
    const STATE: DiagnosisState = DiagnosisState::Received;

    fn into_object(self) -> Option<StoredObjectRef> {
        None
    }
}

impl ActiveState for Stored {
    const STATE: DiagnosisState = DiagnosisState::Stored;

    fn into_object(self) -> Option<StoredObjectRef> {
        Some(self.object)
    }
}

impl ActiveState for Classifying {
    const STATE: DiagnosisState = DiagnosisState::Classifying;

    fn into_object(self) -> Option<StoredObjectRef> {
        Some(self.object)
    }
}

/// One in-flight diagnosis request.
pub struct Diagnosis<S: ActiveState> {
    submission: ImageSubmission,
    transitions: Vec<DiagnosisState>,
    state: S,
}

impl<S: ActiveState> Diagnosis<S> {
    pub fn submission(&self) -> &ImageSubmission {
        &self.submission
    }

    pub fn state(&self) -> DiagnosisState {
        S::STATE
    }

    fn advance<T: ActiveState>(self, state: T) -> Diagnosis<T> {
        debug_assert!(!T::STATE.is_terminal());

        info!("Submission `{}`: {} -> {}", self.submission.id, self.state(), T::STATE);

        let mut transitions = self.transitions;
        transitions.push(T::STATE);

        Diagnosis {
            submission: self.submission,
            transitions,
            state,
        }
    }

    /// Any non-terminal state -> `Failed`.
    ///
    /// A stored object stays where it is and is reported on the outcome.
    pub fn failed(self, err: DiagnosisError) -> DiagnosisOutcome {
        error!("Submission `{}`: {} -> failed: {err}", self.submission.id, self.state());

        let mut transitions = self.transitions;
        transitions.push(DiagnosisState::Failed);

        DiagnosisOutcome::Failed {
            submission_id: self.submission.id,
            kind: err.kind(),
            detail: err.to_string(),
            object: self.state.into_object(),
            transitions,
        }
    }
}

impl Diagnosis<Received> {
    pub fn new(submission: ImageSubmission) -> Self {
        Self {
            submission,
            transitions: vec![DiagnosisState::Received],
            state: Received,
        }
    }

    /// `Received -> Stored`, once the blob store accepted the image.
    pub fn stored(self, object: StoredObjectRef) -> Diagnosis<Stored> {
        self.advance(Stored { object })
    }
}

impl Diagnosis<Stored> {
    pub fn object(&self) -> &StoredObjectRef {
        &self.state.object
    }

    /// `Stored -> Classifying`, once a bot session is open.
    pub fn classifying(self, session: BotSession) -> Diagnosis<Classifying> {
        let object = self.state.object.clone();
        self.advance(Classifying { object, session })
    }
}

impl Diagnosis<Classifying> {
    /// Borrow what the bot client needs for the exchange.
    pub fn parts_mut(&mut self) -> (&StoredObjectRef, &ImageSubmission, &mut BotSession) {
        (&self.state.object, &self.submission, &mut self.state.session)
    }

    /// `Classifying -> Completed`, on a final bot response.
    ///
    /// The session is handed back only when the caller asked to keep it.
    pub fn completed(self, result: DiagnosisResult, keep_session: bool) -> DiagnosisOutcome {
        info!("Submission `{}`: classifying -> completed", self.submission.id);

        let mut transitions = self.transitions;
        transitions.push(DiagnosisState::Completed);

        DiagnosisOutcome::Completed {
            submission_id: self.submission.id,
            result,
            session: keep_session.then_some(self.state.session),
            transitions,
        }
    }
}

/// How a diagnosis request ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiagnosisOutcome {
    Completed {
        submission_id: String,
        result: DiagnosisResult,
        #[serde(skip)]
        session: Option<BotSession>,
        transitions: Vec<DiagnosisState>,
    },
    Failed {
        submission_id: String,
        kind: ErrorKind,
        detail: String,
        object: Option<StoredObjectRef>,
        transitions: Vec<DiagnosisState>,
    },
}

impl DiagnosisOutcome {
    pub fn submission_id(&self) -> &str {
        match self {
            Self::Completed { submission_id, .. } | Self::Failed { submission_id, .. } => submission_id,
        }
    }

    /// The terminal state.
    pub fn state(&self) -> DiagnosisState {
        match self {
            Self::Completed { .. } => DiagnosisState::Completed,
            Self::Failed { .. } => DiagnosisState::Failed,
        }
    }

    /// Every state the request went through, in order.
    pub fn transitions(&self) -> &[DiagnosisState] {
        match self {
            Self::Completed { transitions, .. } | Self::Failed { transitions, .. } => transitions,
        }
    }

    pub fn result(&self) -> Option<&DiagnosisResult> {
        match self {
            Self::Completed { result, .. } => Some(result),
            Self::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }

    /// The stored object, whether or not the request completed.
    pub fn object(&self) -> Option<&StoredObjectRef> {
        match self {
            Self::Completed { result, .. } => Some(&result.object),
            Self::Failed { object, .. } => object.as_ref(),
        }
    }

    /// Take the kept bot session, if any.
    pub fn take_session(&mut self) -> Option<BotSession> {
        match self {
            Self::Completed { session, .. } => session.take(),
            Self::Failed { .. } => None,
        }
    }
}
