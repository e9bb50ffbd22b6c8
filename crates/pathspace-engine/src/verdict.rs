//! Verification verdicts and per-path reports.

use std::collections::BTreeSet;
use std::fmt;

/// Whether a property holds. Ordered worst-first: `Refuted < Unknown < Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VerificationStatus {
    /// Some explored path violates the property.
    Refuted,
    /// Not every path was explored, or some path could not be decided.
    Unknown,
    /// Every reachable path was explored and none violated the property.
    Confirmed,
}

impl VerificationStatus {
    pub const ALL: [VerificationStatus; 3] = [
        VerificationStatus::Refuted,
        VerificationStatus::Unknown,
        VerificationStatus::Confirmed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VerificationStatus::Refuted => "refuted",
            VerificationStatus::Unknown => "unknown",
            VerificationStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a diagnostic message, ordered by which kind overrides another
/// when both are reported for the same source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    /// The postcondition holds over all execution paths.
    Confirmed,
    /// The postcondition holds over the paths that were attempted.
    CannotConfirm,
    /// No attempted path got past the precondition checks.
    PreUnsat,
    /// The postcondition raised an error for some input.
    PostErr,
    /// The body raised an error for some input.
    ExecErr,
    /// Replaying a path made different decisions than its first execution.
    NotDeterministic,
    /// The postcondition returned false for some input.
    PostFail,
    /// Conditions could not be parsed.
    SyntaxErr,
    /// The code under test could not be loaded.
    ImportErr,
}

impl MessageKind {
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Confirmed => "confirmed",
            MessageKind::CannotConfirm => "cannot_confirm",
            MessageKind::PreUnsat => "pre_unsat",
            MessageKind::PostErr => "post_err",
            MessageKind::ExecErr => "exec_err",
            MessageKind::NotDeterministic => "not_deterministic",
            MessageKind::PostFail => "post_fail",
            MessageKind::SyntaxErr => "syntax_err",
            MessageKind::ImportErr => "import_err",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A diagnostic attached to a path's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisMessage {
    pub kind: MessageKind,
    pub message: String,
    pub filename: String,
    pub line: u32,
    pub column: u32,
    pub traceback: String,
    pub test_fn: Option<String>,
    pub condition_src: Option<String>,
}

impl AnalysisMessage {
    pub fn new(kind: MessageKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            filename: String::new(),
            line: 0,
            column: 0,
            traceback: String::new(),
            test_fn: None,
            condition_src: None,
        }
    }

    pub fn at(mut self, filename: impl Into<String>, line: u32, column: u32) -> Self {
        self.filename = filename.into();
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = traceback.into();
        self
    }
}

impl fmt::Display for AnalysisMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filename.is_empty() {
            write!(f, "{}: {}", self.kind, self.message)
        } else {
            write!(
                f,
                "{}:{}:{}: {}: {}",
                self.filename, self.line, self.column, self.kind, self.message
            )
        }
    }
}

/// A precondition that blocked execution of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub expr_source: String,
    pub filename: String,
    pub line: u32,
}

impl Precondition {
    pub fn new(expr_source: impl Into<String>, filename: impl Into<String>, line: u32) -> Self {
        Self {
            expr_source: expr_source.into(),
            filename: filename.into(),
            line,
        }
    }
}

/// Report for one path, or aggregated over a subtree.
///
/// A `Confirmed` status is only ever reported by a node that is exhausted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallAnalysis {
    /// `None` means the path is void and contributes nothing.
    pub status: Option<VerificationStatus>,
    pub messages: Vec<AnalysisMessage>,
    pub failing_precondition: Option<Precondition>,
    pub failing_precondition_reason: String,
    /// Solver expressions realized to concrete values on this path, by text.
    pub realized_exprs: BTreeSet<String>,
}

impl CallAnalysis {
    pub fn new(status: VerificationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn confirmed() -> Self {
        Self::new(VerificationStatus::Confirmed)
    }

    pub fn unknown() -> Self {
        Self::new(VerificationStatus::Unknown)
    }

    /// A refuting report carrying one diagnostic.
    pub fn refuted(message: AnalysisMessage) -> Self {
        Self::new(VerificationStatus::Refuted).with_message(message)
    }

    /// A void path: it neither confirms nor refutes.
    pub fn ignored() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: AnalysisMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_failing_precondition(
        mut self,
        precondition: Precondition,
        reason: impl Into<String>,
    ) -> Self {
        self.failing_precondition = Some(precondition);
        self.failing_precondition_reason = reason.into();
        self
    }

    pub fn is_refuted(&self) -> bool {
        self.status == Some(VerificationStatus::Refuted)
    }
}
