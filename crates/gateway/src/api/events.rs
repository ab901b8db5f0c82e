//! SSE rendering of live subscriptions.
//!
//! Each refresh becomes a `snapshot` event carrying the whole window as a
//! JSON array. Status transitions (`live` / `stalled`) are sent as
//! `status` events so clients can show a disconnected state. Dropping the
//! response stream drops the subscription, which stops its refresh task.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Serialize;

use ss_sessions::{Subscription, SubscriptionStatus};

pub(crate) fn subscription_sse<T>(
    mut subscription: Subscription<T>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let mut status = subscription.status_watch();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("subscribed").data(subscription.id().to_owned()));
        loop {
            let event = tokio::select! {
                snapshot = subscription.next() => match snapshot {
                    Some(items) => serde_json::to_string(&items)
                        .ok()
                        .map(|json| Event::default().event("snapshot").data(json)),
                    None => break,
                },
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *status.borrow_and_update();
                    Some(Event::default().event("status").data(status_json(current).to_string()))
                }
            };
            if let Some(event) = event {
                yield Ok(event);
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn status_json(status: SubscriptionStatus) -> serde_json::Value {
    match status {
        SubscriptionStatus::Live => serde_json::json!({ "status": "live" }),
        SubscriptionStatus::Stalled { failures } => {
            serde_json::json!({ "status": "stalled", "failures": failures })
        }
    }
}
