mod availability;
mod error;
mod mutations;
mod queries;

pub use availability::{available_dates, available_slots};
pub use error::EngineError;
pub use queries::AppointmentPage;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedVisitState = Arc<RwLock<VisitState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking engine: visits, their slots, and appointments against them.
///
/// Every visit's state sits behind its own RwLock; a slot's capacity check
/// and mutation always run under the owning visit's write lock, so two
/// bookings racing for the same seat serialize there.
pub struct Engine {
    pub state: DashMap<Ulid, SharedVisitState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    /// Reverse lookup: slot id → owning visit id.
    pub(super) slot_to_visit: DashMap<Ulid, Ulid>,
    /// Slot → appointment ids, for conflict checks on visit deletion.
    pub(super) slot_appointments: DashMap<Ulid, Vec<Ulid>>,
    /// All appointments by id. Mutated only under the owning visit's lock.
    pub(super) appointments: DashMap<Ulid, Appointment>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            clock,
            slot_to_visit: DashMap::new(),
            slot_appointments: DashMap::new(),
            appointments: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::VisitCreated {
                    id,
                    title,
                    description,
                    capacity_per_slot,
                } => {
                    let vs =
                        VisitState::new(*id, title.clone(), description.clone(), *capacity_per_slot);
                    engine.state.insert(*id, Arc::new(RwLock::new(vs)));
                }
                Event::VisitDeleted { id } => {
                    let slot_ids = engine
                        .get_visit(id)
                        .map(|vs| {
                            let guard = vs.try_read().expect("replay: uncontended read");
                            guard.slots.iter().map(|s| s.id).collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    engine.remove_visit_entry(id, &slot_ids);
                }
                other => {
                    if let Some(visit_id) = engine.event_visit_id(other)
                        && let Some(entry) = engine.state.get(&visit_id)
                    {
                        let vs_arc = entry.clone();
                        let mut guard = vs_arc.try_write().expect("replay: uncontended write");
                        engine.apply_to_visit(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_visit(&self, id: &Ulid) -> Option<SharedVisitState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn visit_for_slot(&self, slot_id: &Ulid) -> Option<Ulid> {
        self.slot_to_visit.get(slot_id).map(|e| *e.value())
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify in one call, under the caller's visit lock.
    pub(super) async fn persist_and_apply(
        &self,
        visit_id: Ulid,
        vs: &mut VisitState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_visit(vs, event);
        self.notify.send(visit_id, event);
        Ok(())
    }

    /// Apply an event to a visit's state and the engine indexes.
    /// No locking — the caller holds the visit's write lock (or owns it
    /// exclusively during replay).
    pub(super) fn apply_to_visit(&self, vs: &mut VisitState, event: &Event) {
        match event {
            Event::VisitUpdated {
                title,
                description,
                capacity_per_slot,
                status,
                ..
            } => {
                vs.title = title.clone();
                vs.description = description.clone();
                vs.capacity_per_slot = *capacity_per_slot;
                vs.status = *status;
            }
            Event::SlotAdded {
                id,
                visit_id,
                date,
                start_time,
                end_time,
                max_appointments,
            } => {
                vs.insert_slot(Slot {
                    id: *id,
                    visit_id: *visit_id,
                    date: *date,
                    start_time: *start_time,
                    end_time: *end_time,
                    max_appointments: *max_appointments,
                    booked_count: 0,
                });
                self.slot_to_visit.insert(*id, *visit_id);
            }
            Event::AppointmentBooked {
                id,
                user_id,
                slot_id,
                number_of_people,
                description,
                created_at,
            } => {
                if let Some(slot) = vs.slot_mut(*slot_id) {
                    slot.booked_count += number_of_people;
                }
                self.appointments.insert(
                    *id,
                    Appointment {
                        id: *id,
                        user_id: user_id.clone(),
                        slot_id: *slot_id,
                        number_of_people: *number_of_people,
                        description: description.clone(),
                        status: AppointmentStatus::Pending,
                        created_at: *created_at,
                    },
                );
                self.slot_appointments.entry(*slot_id).or_default().push(*id);
            }
            Event::AppointmentTransitioned { id, slot_id, from, to } => {
                if releases_capacity(*from, *to)
                    && let Some(appt) = self.appointments.get(id)
                    && let Some(slot) = vs.slot_mut(*slot_id)
                {
                    slot.booked_count = slot.booked_count.saturating_sub(appt.number_of_people);
                }
                if let Some(mut appt) = self.appointments.get_mut(id) {
                    appt.status = *to;
                }
            }
            // VisitCreated/Deleted are handled at the DashMap level, not here
            Event::VisitCreated { .. } | Event::VisitDeleted { .. } => {}
        }
    }

    /// Drop a visit and its slots from the indexes. Appointments survive as
    /// audit records (only terminal ones can exist at this point).
    pub(super) fn remove_visit_entry(&self, id: &Ulid, slot_ids: &[Ulid]) {
        self.state.remove(id);
        for slot_id in slot_ids {
            self.slot_to_visit.remove(slot_id);
            self.slot_appointments.remove(slot_id);
        }
        self.notify.remove(id);
    }

    /// Resolve the visit an event belongs to (for non-Create/Delete events).
    fn event_visit_id(&self, event: &Event) -> Option<Ulid> {
        match event {
            Event::VisitUpdated { id, .. } => Some(*id),
            Event::SlotAdded { visit_id, .. } => Some(*visit_id),
            Event::AppointmentBooked { slot_id, .. }
            | Event::AppointmentTransitioned { slot_id, .. } => self.visit_for_slot(slot_id),
            Event::VisitCreated { .. } | Event::VisitDeleted { .. } => None,
        }
    }
}
