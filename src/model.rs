use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Whether a visit is offered for booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Active,
    Inactive,
}

/// Appointment lifecycle. Pending and Approved hold slot capacity;
/// Rejected, Cancelled and Completed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed)
    }

    /// Statuses that count toward a slot's booked_count.
    pub fn holds_capacity(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// The state machine: pending → {approved, rejected, cancelled},
    /// approved → {completed, cancelled}, terminal states are final.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Approved | Rejected | Cancelled) | (Approved, Completed | Cancelled)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// True if moving `from` → `to` returns the appointment's people to the slot.
/// Completion keeps the counter: the slot's time has passed, so the capacity
/// is moot, and the occupancy stays on record.
pub fn releases_capacity(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    from.holds_capacity()
        && matches!(
            to,
            AppointmentStatus::Rejected | AppointmentStatus::Cancelled
        )
}

/// A bookable time window under a visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Ulid,
    pub visit_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_appointments: u32,
    /// Sum of number_of_people across capacity-holding appointments.
    pub booked_count: u32,
}

impl Slot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn is_full(&self) -> bool {
        self.booked_count >= self.max_appointments
    }

    pub fn remaining(&self) -> u32 {
        self.max_appointments.saturating_sub(self.booked_count)
    }

    /// A slot at or past its start is permanently unbookable.
    pub fn is_elapsed(&self, now: NaiveDateTime) -> bool {
        self.starts_at() <= now
    }
}

/// A user's reservation of some occupancy within one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub user_id: String,
    pub slot_id: Ulid,
    pub number_of_people: u32,
    pub description: String,
    pub status: AppointmentStatus,
    pub created_at: NaiveDateTime,
}

/// In-memory state of one visit and the slots it owns.
/// Slots stay sorted ascending by (date, start_time, id).
#[derive(Debug, Clone)]
pub struct VisitState {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    /// Default max occupancy a newly created slot inherits.
    pub capacity_per_slot: u32,
    pub status: VisitStatus,
    pub slots: Vec<Slot>,
}

impl VisitState {
    pub fn new(id: Ulid, title: String, description: String, capacity_per_slot: u32) -> Self {
        Self {
            id,
            title,
            description,
            capacity_per_slot,
            status: VisitStatus::Active,
            slots: Vec::new(),
        }
    }

    /// Insert a slot maintaining the (date, start_time, id) sort order.
    pub fn insert_slot(&mut self, slot: Slot) {
        let key = (slot.date, slot.start_time, slot.id);
        let pos = self
            .slots
            .binary_search_by_key(&key, |s| (s.date, s.start_time, s.id))
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn slot(&self, id: Ulid) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn slot_mut(&mut self, id: Ulid) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// booked_count is never stored; replaying the events reconstructs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VisitCreated {
        id: Ulid,
        title: String,
        description: String,
        capacity_per_slot: u32,
    },
    VisitUpdated {
        id: Ulid,
        title: String,
        description: String,
        capacity_per_slot: u32,
        status: VisitStatus,
    },
    VisitDeleted {
        id: Ulid,
    },
    SlotAdded {
        id: Ulid,
        visit_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        max_appointments: u32,
    },
    AppointmentBooked {
        id: Ulid,
        user_id: String,
        slot_id: Ulid,
        number_of_people: u32,
        description: String,
        created_at: NaiveDateTime,
    },
    AppointmentTransitioned {
        id: Ulid,
        slot_id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitInfo {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub capacity_per_slot: u32,
    pub status: VisitStatus,
    pub slot_count: usize,
}

impl VisitInfo {
    pub fn from_state(vs: &VisitState) -> Self {
        Self {
            id: vs.id,
            title: vs.title.clone(),
            description: vs.description.clone(),
            capacity_per_slot: vs.capacity_per_slot,
            status: vs.status,
            slot_count: vs.slots.len(),
        }
    }
}
