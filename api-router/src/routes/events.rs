use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;

use common::scopes::Scope;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthedUser};

/// Server-sent bridge over the caller's import event stream.
///
/// Lagged receivers simply skip ahead; the at-most-once contract already
/// allows drops.
pub async fn import_events(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthedUser>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    user.require(Scope::LibraryRead)?;
    let mut receiver = state.events.subscribe(&user.id);

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse_event) => yield Ok(sse_event),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to serialize import event");
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "import event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
