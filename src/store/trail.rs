use crate::db::{BackendKind, FailureClass};
use std::fmt;
use std::time::Duration;

/// Why an attempt was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// First try on the primary backend
    Preferred,
    /// Retry on the primary with an unknown column removed
    Narrowed,
    /// The caller's query on the secondary backend
    Fallback,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Preferred => write!(f, "preferred"),
            Step::Narrowed => write!(f, "narrowed"),
            Step::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub backend: BackendKind,
    pub step: Step,
    /// Column removed before this attempt, for narrowed retries
    pub dropped_column: Option<String>,
    /// `None` when the attempt succeeded
    pub failure: Option<(FailureClass, String)>,
    pub elapsed: Duration,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Ordered record of every backend attempt made for one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trail {
    attempts: Vec<Attempt>,
}

impl Trail {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// The backend that produced the final result.
    pub fn served_by(&self) -> Option<BackendKind> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.succeeded())
            .map(|a| a.backend)
    }

    pub fn fell_back(&self) -> bool {
        self.attempts.iter().any(|a| a.step == Step::Fallback)
    }

    pub fn narrowed(&self) -> bool {
        self.attempts.iter().any(|a| a.step == Step::Narrowed)
    }

    pub fn attempts_on(&self, kind: BackendKind) -> usize {
        self.attempts.iter().filter(|a| a.backend == kind).count()
    }

    /// One-line description, e.g. `rest:preferred=Unreachable -> sqlite:fallback=ok`.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                let result = match &a.failure {
                    None => "ok".to_string(),
                    Some((class, _)) => class.to_string(),
                };
                match &a.dropped_column {
                    Some(column) => format!("{}:{}(-{})={}", a.backend, a.step, column, result),
                    None => format!("{}:{}={}", a.backend, a.step, result),
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl fmt::Display for Trail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
