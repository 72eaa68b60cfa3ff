use snafu::Snafu;

pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ScheduleError {
    /// A structural precondition of a primitive does not hold.
    #[snafu(display("invalid {step}: {reason}"))]
    InvalidTransform { step: &'static str, reason: String },

    /// The loop nest or buffer shapes do not match the intrinsic.
    #[snafu(display("loop nest does not match intrinsic {intrinsic:?}: {reason}"))]
    TensorizeMismatch { intrinsic: String, reason: String },

    /// A buffer touched by the nest violates the intrinsic's scope, dtype,
    /// alignment or offset-factor requirement.
    #[snafu(display("buffer {buffer:?} violates intrinsic {intrinsic:?}: {reason}"))]
    ScopeViolation { intrinsic: String, buffer: String, reason: String },

    #[snafu(display("unknown tensor intrinsic {name:?}"))]
    UnknownIntrinsic { name: String },

    #[snafu(display("tensor intrinsic {name:?} is already registered"))]
    DuplicateIntrinsic { name: String },

    /// A `follow_*` step references a log entry that is absent or of the
    /// wrong kind.
    #[snafu(display("cannot follow step {step_id}: {reason}"))]
    ReplayError { step_id: usize, reason: String },

    #[snafu(display("compute graph error: {source}"))]
    Graph { source: tessel_ir::Error },
}

/// Payload-free discriminant of [`ScheduleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    InvalidTransform,
    TensorizeMismatch,
    ScopeViolation,
    UnknownIntrinsic,
    DuplicateIntrinsic,
    ReplayError,
    Graph,
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransform { .. } => ErrorKind::InvalidTransform,
            Self::TensorizeMismatch { .. } => ErrorKind::TensorizeMismatch,
            Self::ScopeViolation { .. } => ErrorKind::ScopeViolation,
            Self::UnknownIntrinsic { .. } => ErrorKind::UnknownIntrinsic,
            Self::DuplicateIntrinsic { .. } => ErrorKind::DuplicateIntrinsic,
            Self::ReplayError { .. } => ErrorKind::ReplayError,
            Self::Graph { .. } => ErrorKind::Graph,
        }
    }
}

impl From<tessel_ir::Error> for ScheduleError {
    fn from(source: tessel_ir::Error) -> Self {
        Self::Graph { source }
    }
}
