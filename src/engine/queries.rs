use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{available_dates, available_slots};
use super::{Engine, EngineError, SharedVisitState};

/// One page of an administrative appointment listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentPage {
    pub items: Vec<Appointment>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl Engine {
    pub async fn list_visits(&self) -> Vec<VisitInfo> {
        // Clone the Arcs out first so no map shard is held across an await.
        let states: Vec<SharedVisitState> =
            self.state.iter().map(|entry| entry.value().clone()).collect();
        let mut visits = Vec::with_capacity(states.len());
        for vs in states {
            let guard = vs.read().await;
            visits.push(VisitInfo::from_state(&guard));
        }
        visits.sort_by_key(|v| v.id);
        visits
    }

    /// All slots of a visit, ascending by (date, start_time).
    pub async fn list_slots(&self, visit_id: Ulid) -> Result<Vec<Slot>, EngineError> {
        let vs = match self.get_visit(&visit_id) {
            Some(vs) => vs,
            None => return Ok(vec![]),
        };
        let guard = vs.read().await;
        Ok(guard.slots.clone())
    }

    /// Slots of a visit that are under capacity and not yet elapsed,
    /// ascending by (date, start_time). Inactive visits offer nothing.
    pub async fn list_available_slots(&self, visit_id: Ulid) -> Result<Vec<Slot>, EngineError> {
        let vs = match self.get_visit(&visit_id) {
            Some(vs) => vs,
            None => return Ok(vec![]),
        };
        let guard = vs.read().await;
        if guard.status == VisitStatus::Inactive {
            return Ok(vec![]);
        }
        let now = self.clock.now();
        Ok(available_slots(&guard.slots, now).cloned().collect())
    }

    /// Distinct dates with at least one bookable slot, ascending.
    pub async fn list_available_dates(
        &self,
        visit_id: Ulid,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let vs = match self.get_visit(&visit_id) {
            Some(vs) => vs,
            None => return Ok(vec![]),
        };
        let guard = vs.read().await;
        if guard.status == VisitStatus::Inactive {
            return Ok(vec![]);
        }
        Ok(available_dates(&guard.slots, self.clock.now()))
    }

    /// Administrative listing, ordered by (created_at, id). Pagination is a
    /// hard contract: page >= 1, 1 <= limit <= MAX_PAGE_SIZE.
    pub fn list_appointments(
        &self,
        status: Option<AppointmentStatus>,
        page: usize,
        limit: usize,
    ) -> Result<AppointmentPage, EngineError> {
        if page < 1 {
            return Err(EngineError::Validation("page must be >= 1"));
        }
        if limit < 1 {
            return Err(EngineError::Validation("limit must be >= 1"));
        }
        if limit > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page size too large"));
        }

        let mut matching: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|e| status.is_none_or(|s| e.value().status == s))
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by_key(|a| (a.created_at, a.id));

        let total = matching.len();
        // A page past the end is a valid request: empty items, true total.
        // saturating_mul so an absurd page number cannot wrap the offset.
        let items = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();

        Ok(AppointmentPage {
            items,
            total,
            page,
            limit,
        })
    }
}
