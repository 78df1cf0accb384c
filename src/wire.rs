use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::api::{Envelope, Request, Response};
use crate::engine::{Engine, EngineError};
use crate::limits::{DEFAULT_PAGE_SIZE, MAX_LINE_LEN};
use crate::model::Event;
use crate::observability;

/// Serve one client: newline-delimited JSON, one `Envelope` per request
/// line, one `Response` per line back. Watched-visit events are pushed
/// interleaved with responses.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (mut sink, mut stream) = framed.split();

    // Watch forwarder tasks funnel events through one channel so the write
    // half stays owned by this task.
    let (event_tx, mut event_rx) = mpsc::channel::<(Ulid, Event)>(256);

    loop {
        tokio::select! {
            line = stream.next() => {
                let line = match line {
                    None => break, // client hung up
                    Some(Err(e)) => return Err(codec_err(e)),
                    Some(Ok(line)) => line,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&engine, &line, &event_tx).await;
                send_response(&mut sink, &response).await?;
            }
            Some((visit_id, event)) = event_rx.recv() => {
                send_response(&mut sink, &Response::Event { visit_id, event }).await?;
            }
        }
    }

    Ok(())
}

async fn send_response<S>(sink: &mut S, response: &Response) -> io::Result<()>
where
    S: futures::Sink<String, Error = LinesCodecError> + Unpin,
{
    let line = serde_json::to_string(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    sink.send(line).await.map_err(codec_err)
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "request line too long")
        }
    }
}

async fn handle_line(
    engine: &Arc<Engine>,
    line: &str,
    event_tx: &mpsc::Sender<(Ulid, Event)>,
) -> Response {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(env) => env,
        Err(e) => return Response::parse_error(e.to_string()),
    };
    // The caller-supplied flag is trusted; authentication lives outside
    // this boundary.
    if envelope.req.requires_admin() && !envelope.is_admin {
        return Response::forbidden();
    }

    let label = observability::request_label(&envelope.req);
    let start = std::time::Instant::now();
    let response = dispatch(engine, envelope, event_tx).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "request" => label)
        .record(start.elapsed().as_secs_f64());
    let status = if matches!(response, Response::Error { .. }) {
        "error"
    } else {
        "ok"
    };
    metrics::counter!(observability::REQUESTS_TOTAL, "request" => label, "status" => status)
        .increment(1);
    response
}

async fn dispatch(
    engine: &Arc<Engine>,
    envelope: Envelope,
    event_tx: &mpsc::Sender<(Ulid, Event)>,
) -> Response {
    let user_id = envelope.user_id;
    match envelope.req {
        Request::CreateVisit {
            title,
            description,
            capacity_per_slot,
        } => match engine
            .create_visit(Ulid::new(), title, description, capacity_per_slot)
            .await
        {
            Ok(visit) => Response::Visit { visit },
            Err(e) => Response::from_error(&e),
        },
        Request::UpdateVisit {
            id,
            title,
            description,
            capacity_per_slot,
            status,
        } => match engine
            .update_visit(id, title, description, capacity_per_slot, status)
            .await
        {
            Ok(visit) => Response::Visit { visit },
            Err(e) => Response::from_error(&e),
        },
        Request::DeleteVisit { id } => match engine.delete_visit(id).await {
            Ok(()) => Response::Deleted,
            Err(e) => Response::from_error(&e),
        },
        Request::AddSlot {
            visit_id,
            date,
            start_time,
            end_time,
            max_appointments,
        } => match engine
            .add_slot(
                Ulid::new(),
                visit_id,
                date,
                start_time,
                end_time,
                max_appointments,
            )
            .await
        {
            Ok(slot) => Response::Slot { slot },
            Err(e) => Response::from_error(&e),
        },
        Request::Book {
            slot_id,
            number_of_people,
            description,
        } => match engine
            .book(Ulid::new(), user_id, slot_id, number_of_people, description)
            .await
        {
            Ok(appointment) => Response::Appointment { appointment },
            Err(e) => Response::from_error(&e),
        },
        Request::Transition {
            appointment_id,
            status,
        } => match engine.transition(appointment_id, status).await {
            Ok(appointment) => Response::Appointment { appointment },
            Err(e) => Response::from_error(&e),
        },
        Request::ListVisits => Response::Visits {
            visits: engine.list_visits().await,
        },
        Request::ListSlots { visit_id } => match engine.list_slots(visit_id).await {
            Ok(slots) => Response::Slots { slots },
            Err(e) => Response::from_error(&e),
        },
        Request::ListAvailableSlots { visit_id } => {
            match engine.list_available_slots(visit_id).await {
                Ok(slots) => Response::Slots { slots },
                Err(e) => Response::from_error(&e),
            }
        }
        Request::ListAvailableDates { visit_id } => {
            match engine.list_available_dates(visit_id).await {
                Ok(dates) => Response::Dates { dates },
                Err(e) => Response::from_error(&e),
            }
        }
        Request::ListAppointments {
            status,
            page,
            limit,
        } => {
            match engine.list_appointments(
                status,
                page.unwrap_or(1),
                limit.unwrap_or(DEFAULT_PAGE_SIZE),
            ) {
                Ok(p) => Response::Appointments {
                    appointments: p.items,
                    total: p.total,
                    page: p.page,
                    limit: p.limit,
                },
                Err(e) => Response::from_error(&e),
            }
        }
        Request::Watch { visit_id } => {
            if engine.get_visit(&visit_id).is_none() {
                return Response::from_error(&EngineError::NotFound(visit_id));
            }
            let mut rx = engine.notify.subscribe(visit_id);
            let tx = event_tx.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if tx.send((visit_id, event)).await.is_err() {
                                break; // connection closed
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Response::Watching { visit_id }
        }
    }
}
