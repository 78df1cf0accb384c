use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: bad time range, empty fields, non-positive counts.
    Validation(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The slot's (date, start_time) is not strictly after the clock.
    SlotElapsed(Ulid),
    /// Booking would push booked_count past max_appointments.
    CapacityExceeded { requested: u32, available: u32 },
    /// Structural violation, e.g. deleting a visit with active appointments.
    Conflict(Ulid),
    /// The requested edge is not in the appointment state machine.
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    LimitExceeded(&'static str),
    /// Storage fault. The only kind a caller may sensibly retry.
    Wal(String),
}

impl EngineError {
    /// Stable machine-readable kind, used by the wire layer so clients can
    /// tell retryable storage faults from business-rule violations.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::SlotElapsed(_) => "slot_elapsed",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::Conflict(_) => "conflict",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Wal(_) => "storage",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotElapsed(id) => write!(f, "slot {id} has already started"),
            EngineError::CapacityExceeded {
                requested,
                available,
            } => {
                write!(
                    f,
                    "capacity exceeded: requested {requested}, {available} remaining"
                )
            }
            EngineError::Conflict(id) => {
                write!(f, "conflict: {id} has active appointments")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
