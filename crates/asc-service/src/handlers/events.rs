//! Session event stream.
//!
//! - `GET /api/v1/sessions/{id}/events` - Server-sent events for one session

use super::{ActingUser, ApiPath};
use crate::errors::AscError;
use crate::events::SessionEvent;
use crate::routes::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use common::types::SessionId;
use futures::{future, stream::Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Handler for GET /api/v1/sessions/{id}/events
///
/// Each event is sent as `event: <kind>` with its JSON as data. The stream
/// ends after `session_ended`, or when the room goes away.
///
/// # Response
///
/// - 200 OK: `text/event-stream`
/// - 403 Forbidden: caller is not an active participant
/// - 404 Not Found: unknown session
/// - 422 Unprocessable Entity: the session has ended
pub async fn session_events(
    State(state): State<Arc<AppState>>,
    ApiPath(session_id): ApiPath<SessionId>,
    ActingUser(user_id): ActingUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AscError> {
    let receiver = state
        .service
        .sessions
        .subscribe(session_id, user_id)
        .await?;
    debug!(
        target: "asc.handlers",
        session_id = %session_id,
        user_id = %user_id,
        "Event stream opened"
    );

    let stream = BroadcastStream::new(receiver)
        .filter_map(move |item| {
            future::ready(match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(
                        target: "asc.handlers",
                        session_id = %session_id,
                        skipped,
                        "Event subscriber lagged"
                    );
                    None
                }
            })
        })
        .scan(false, |ended, event| {
            if *ended {
                return future::ready(None);
            }
            *ended = matches!(event, SessionEvent::SessionEnded { .. });
            future::ready(Some(event))
        })
        .filter_map(|event| future::ready(to_sse(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

fn to_sse(event: &SessionEvent) -> Option<Result<Event, Infallible>> {
    match Event::default().event(event.kind()).json_data(event) {
        Ok(sse) => Some(Ok(sse)),
        Err(e) => {
            warn!(
                target: "asc.handlers",
                kind = event.kind(),
                error = %e,
                "Failed to encode event"
            );
            None
        }
    }
}
