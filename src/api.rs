use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// One request line on the wire. The engine trusts `user_id`/`is_admin`
/// from the caller; authentication happens outside this boundary.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
    pub req: Request,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateVisit {
        title: String,
        description: String,
        capacity_per_slot: u32,
    },
    UpdateVisit {
        id: Ulid,
        title: String,
        description: String,
        capacity_per_slot: u32,
        status: VisitStatus,
    },
    DeleteVisit {
        id: Ulid,
    },
    AddSlot {
        visit_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        max_appointments: Option<u32>,
    },
    Book {
        slot_id: Ulid,
        number_of_people: u32,
        description: String,
    },
    Transition {
        appointment_id: Ulid,
        status: AppointmentStatus,
    },
    ListVisits,
    ListSlots {
        visit_id: Ulid,
    },
    ListAvailableSlots {
        visit_id: Ulid,
    },
    ListAvailableDates {
        visit_id: Ulid,
    },
    ListAppointments {
        status: Option<AppointmentStatus>,
        page: Option<usize>,
        limit: Option<usize>,
    },
    Watch {
        visit_id: Ulid,
    },
}

impl Request {
    /// Mutating visit/slot management, transitions and the appointment
    /// listing are administrative; booking and availability reads are not.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Request::CreateVisit { .. }
                | Request::UpdateVisit { .. }
                | Request::DeleteVisit { .. }
                | Request::AddSlot { .. }
                | Request::Transition { .. }
                | Request::ListAppointments { .. }
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Visit {
        visit: VisitInfo,
    },
    Visits {
        visits: Vec<VisitInfo>,
    },
    Slot {
        slot: Slot,
    },
    Slots {
        slots: Vec<Slot>,
    },
    Dates {
        dates: Vec<NaiveDate>,
    },
    Appointment {
        appointment: Appointment,
    },
    Appointments {
        appointments: Vec<Appointment>,
        total: usize,
        page: usize,
        limit: usize,
    },
    Deleted,
    Watching {
        visit_id: Ulid,
    },
    /// Pushed to a watching client when an event commits on the visit.
    Event {
        visit_id: Ulid,
        event: Event,
    },
    Error {
        kind: &'static str,
        message: String,
    },
}

impl Response {
    pub fn from_error(e: &EngineError) -> Self {
        Response::Error {
            kind: e.kind(),
            message: e.to_string(),
        }
    }

    pub fn forbidden() -> Self {
        Response::Error {
            kind: "forbidden",
            message: "request requires is_admin".into(),
        }
    }

    pub fn parse_error(message: String) -> Self {
        Response::Error {
            kind: "parse",
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_book_request() {
        let line = r#"{"user_id":"u1","req":{"op":"book","slot_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","number_of_people":2,"description":"family"}}"#;
        let env: Envelope = serde_json::from_str(line).unwrap();
        assert_eq!(env.user_id, "u1");
        assert!(!env.is_admin); // defaults to false
        assert!(matches!(
            env.req,
            Request::Book {
                number_of_people: 2,
                ..
            }
        ));
        assert!(!env.req.requires_admin());
    }

    #[test]
    fn envelope_parses_admin_request_with_times() {
        let line = r#"{"user_id":"admin","is_admin":true,"req":{"op":"add_slot","visit_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","date":"2025-06-01","start_time":"10:00:00","end_time":"12:00:00"}}"#;
        let env: Envelope = serde_json::from_str(line).unwrap();
        assert!(env.is_admin);
        match env.req {
            Request::AddSlot {
                date,
                start_time,
                max_appointments,
                ..
            } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
                assert_eq!(start_time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
                assert_eq!(max_appointments, None);
            }
            other => panic!("unexpected request: {other:?}"),
        }
        assert!(env.req.requires_admin());
    }

    #[test]
    fn transition_status_parses_snake_case() {
        let line = r#"{"user_id":"admin","is_admin":true,"req":{"op":"transition","appointment_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","status":"approved"}}"#;
        let env: Envelope = serde_json::from_str(line).unwrap();
        assert!(matches!(
            env.req,
            Request::Transition {
                status: AppointmentStatus::Approved,
                ..
            }
        ));
    }

    #[test]
    fn error_response_carries_kind() {
        let resp = Response::from_error(&EngineError::CapacityExceeded {
            requested: 2,
            available: 1,
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""result":"error""#));
        assert!(json.contains(r#""kind":"capacity_exceeded""#));
    }
}
