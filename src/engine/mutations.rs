use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::{RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_visit(
        &self,
        id: Ulid,
        title: String,
        description: String,
        capacity_per_slot: u32,
    ) -> Result<VisitInfo, EngineError> {
        if title.trim().is_empty() {
            return Err(EngineError::Validation("title must not be empty"));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if capacity_per_slot < 1 {
            return Err(EngineError::Validation("capacity_per_slot must be >= 1"));
        }
        if self.state.len() >= MAX_VISITS {
            return Err(EngineError::LimitExceeded("too many visits"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VisitCreated {
            id,
            title: title.clone(),
            description: description.clone(),
            capacity_per_slot,
        };
        self.wal_append(&event).await?;
        let vs = VisitState::new(id, title, description, capacity_per_slot);
        let info = VisitInfo::from_state(&vs);
        self.state.insert(id, Arc::new(RwLock::new(vs)));
        self.notify.send(id, &event);
        Ok(info)
    }

    pub async fn update_visit(
        &self,
        id: Ulid,
        title: String,
        description: String,
        capacity_per_slot: u32,
        status: VisitStatus,
    ) -> Result<VisitInfo, EngineError> {
        if title.trim().is_empty() {
            return Err(EngineError::Validation("title must not be empty"));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if capacity_per_slot < 1 {
            return Err(EngineError::Validation("capacity_per_slot must be >= 1"));
        }
        let vs = self.get_visit(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = vs.write().await;
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::VisitUpdated {
            id,
            title,
            description,
            capacity_per_slot,
            status,
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(VisitInfo::from_state(&guard))
    }

    /// Delete a visit, cascading to its slots. Fails with `Conflict` if any
    /// slot still carries a pending or approved appointment — deletion must
    /// not orphan an active booking. Terminal appointments are kept as
    /// audit records.
    pub async fn delete_visit(&self, id: Ulid) -> Result<(), EngineError> {
        let vs = self.get_visit(&id).ok_or(EngineError::NotFound(id))?;
        let guard = vs.write().await;

        for slot in &guard.slots {
            if let Some(appt_ids) = self.slot_appointments.get(&slot.id) {
                for appt_id in appt_ids.iter() {
                    if let Some(appt) = self.appointments.get(appt_id)
                        && appt.status.holds_capacity()
                    {
                        return Err(EngineError::Conflict(id));
                    }
                }
            }
        }

        let slot_ids: Vec<Ulid> = guard.slots.iter().map(|s| s.id).collect();
        let event = Event::VisitDeleted { id };
        self.wal_append(&event).await?;
        self.notify.send(id, &event);
        // Indexes drop while the guard is still held, so a writer parked on
        // this lock observes the removal when it wakes.
        self.remove_visit_entry(&id, &slot_ids);
        Ok(())
    }

    pub async fn add_slot(
        &self,
        id: Ulid,
        visit_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        max_appointments: Option<u32>,
    ) -> Result<Slot, EngineError> {
        if start_time >= end_time {
            return Err(EngineError::Validation("start_time must be before end_time"));
        }
        let vs = self
            .get_visit(&visit_id)
            .ok_or(EngineError::NotFound(visit_id))?;
        let mut guard = vs.write().await;
        if !self.state.contains_key(&visit_id) {
            return Err(EngineError::NotFound(visit_id));
        }
        if guard.slots.len() >= MAX_SLOTS_PER_VISIT {
            return Err(EngineError::LimitExceeded("too many slots on visit"));
        }

        // New slots inherit the visit's per-slot capacity unless overridden.
        let max_appointments = max_appointments.unwrap_or(guard.capacity_per_slot);
        if max_appointments < 1 {
            return Err(EngineError::Validation("max_appointments must be >= 1"));
        }
        if max_appointments > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("max_appointments too large"));
        }
        if date.and_time(start_time) < self.clock.now() {
            return Err(EngineError::Validation("slot starts in the past"));
        }

        let event = Event::SlotAdded {
            id,
            visit_id,
            date,
            start_time,
            end_time,
            max_appointments,
        };
        self.persist_and_apply(visit_id, &mut guard, &event).await?;
        // apply inserted it; read it back for the caller
        guard
            .slot(id)
            .cloned()
            .ok_or(EngineError::Wal("slot missing after apply".into()))
    }

    /// Book an appointment against a slot.
    ///
    /// Elapsed-time and capacity are re-validated here under the visit's
    /// write lock, never trusted from a caller's earlier availability read:
    /// two users who both saw "1 seat left" serialize on this lock, and the
    /// second fails with `CapacityExceeded`. The counter increment and the
    /// appointment creation commit as one unit (single WAL event).
    pub async fn book(
        &self,
        id: Ulid,
        user_id: String,
        slot_id: Ulid,
        number_of_people: u32,
        description: String,
    ) -> Result<Appointment, EngineError> {
        if user_id.trim().is_empty() {
            return Err(EngineError::Validation("user_id must not be empty"));
        }
        if user_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user_id too long"));
        }
        if description.trim().is_empty() {
            return Err(EngineError::Validation("description must not be empty"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if number_of_people < 1 {
            return Err(EngineError::Validation("number_of_people must be >= 1"));
        }

        let visit_id = self
            .visit_for_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let vs = self
            .get_visit(&visit_id)
            .ok_or(EngineError::NotFound(visit_id))?;
        let mut guard = vs.write().await;

        // A delete may have committed while we waited on the lock; the Arc
        // keeps the old state alive, so re-check map membership.
        if !self.state.contains_key(&visit_id) {
            return Err(EngineError::NotFound(slot_id));
        }
        if guard.status == VisitStatus::Inactive {
            return Err(EngineError::Validation("visit is inactive"));
        }
        let slot = guard.slot(slot_id).ok_or(EngineError::NotFound(slot_id))?;

        let now = self.clock.now();
        if slot.is_elapsed(now) {
            return Err(EngineError::SlotElapsed(slot_id));
        }
        // Compare against remaining capacity, never `booked + n`: the sum
        // can wrap for a hostile n.
        if number_of_people > slot.remaining() {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(EngineError::CapacityExceeded {
                requested: number_of_people,
                available: slot.remaining(),
            });
        }

        let event = Event::AppointmentBooked {
            id,
            user_id: user_id.clone(),
            slot_id,
            number_of_people,
            description: description.clone(),
            created_at: now,
        };
        self.persist_and_apply(visit_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);

        Ok(Appointment {
            id,
            user_id,
            slot_id,
            number_of_people,
            description,
            status: AppointmentStatus::Pending,
            created_at: now,
        })
    }

    /// Move an appointment through its lifecycle. Rejection or cancellation
    /// of a capacity-holding appointment returns its people to the slot;
    /// completion changes no counter.
    pub async fn transition(
        &self,
        appointment_id: Ulid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let appt = self
            .get_appointment(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))?;
        let visit_id = self
            .visit_for_slot(&appt.slot_id)
            .ok_or(EngineError::NotFound(appt.slot_id))?;
        let vs = self
            .get_visit(&visit_id)
            .ok_or(EngineError::NotFound(visit_id))?;
        let mut guard = vs.write().await;
        if !self.state.contains_key(&visit_id) {
            return Err(EngineError::NotFound(appt.slot_id));
        }

        // Re-read under the lock: a concurrent transition may have won.
        let from = self
            .get_appointment(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))?
            .status;
        if !from.can_transition_to(new_status) {
            return Err(EngineError::InvalidTransition {
                from,
                to: new_status,
            });
        }

        let event = Event::AppointmentTransitioned {
            id: appointment_id,
            slot_id: appt.slot_id,
            from,
            to: new_status,
        };
        self.persist_and_apply(visit_id, &mut guard, &event).await?;
        info!(
            appointment = %appointment_id,
            %from,
            to = %new_status,
            "appointment transitioned"
        );

        self.get_appointment(&appointment_id)
            .ok_or(EngineError::NotFound(appointment_id))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let mut live_slots: HashSet<Ulid> = HashSet::new();

        // Clone the Arcs out first so no map shard is held across an await.
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for vs in states {
            let guard = vs.read().await;

            events.push(Event::VisitCreated {
                id: guard.id,
                title: guard.title.clone(),
                description: guard.description.clone(),
                capacity_per_slot: guard.capacity_per_slot,
            });
            if guard.status != VisitStatus::Active {
                events.push(Event::VisitUpdated {
                    id: guard.id,
                    title: guard.title.clone(),
                    description: guard.description.clone(),
                    capacity_per_slot: guard.capacity_per_slot,
                    status: guard.status,
                });
            }
            for slot in &guard.slots {
                live_slots.insert(slot.id);
                events.push(Event::SlotAdded {
                    id: slot.id,
                    visit_id: slot.visit_id,
                    date: slot.date,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    max_appointments: slot.max_appointments,
                });
            }
        }

        // Appointments replay as a booking plus, when non-pending, a single
        // transition. Replay applies counters mechanically from (from, to),
        // so the collapsed edge preserves the net capacity effect even when
        // the live history had an intermediate approval.
        let mut appts: Vec<Appointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        appts.sort_by_key(|a| (a.created_at, a.id));
        for appt in appts {
            if !live_slots.contains(&appt.slot_id) {
                // Audit record for a deleted visit; state cannot be rebuilt
                // against a missing slot, so it ages out here.
                continue;
            }
            events.push(Event::AppointmentBooked {
                id: appt.id,
                user_id: appt.user_id.clone(),
                slot_id: appt.slot_id,
                number_of_people: appt.number_of_people,
                description: appt.description.clone(),
                created_at: appt.created_at,
            });
            if appt.status != AppointmentStatus::Pending {
                events.push(Event::AppointmentTransitioned {
                    id: appt.id,
                    slot_id: appt.slot_id,
                    from: AppointmentStatus::Pending,
                    to: appt.status,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
