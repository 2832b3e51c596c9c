//! Turns WebSocket messages into an ordered stream of byte chunks.

use std::error::Error as StdError;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{future, stream, Stream, StreamExt};

use super::early_data::decode_early_data;
use super::SessionError;

/// Inbound chunk stream for a session.
///
/// Early data (if any) comes first, then each binary or text message in
/// arrival order. Control frames are skipped; a close frame ends the stream.
/// A malformed early-data header or a transport error is yielded as the
/// stream's last item.
pub fn inbound_stream<S, E>(
    early_data: Option<&str>,
    messages: S,
) -> impl Stream<Item = Result<Bytes, SessionError>>
where
    S: Stream<Item = Result<Message, E>>,
    E: StdError,
{
    let (head, messages) = match decode_early_data(early_data) {
        Ok(early) => (early.map(Ok), Some(messages)),
        Err(e) => (Some(Err(e)), None),
    };

    let body = stream::iter(messages)
        .flatten()
        .take_while(|item| future::ready(!matches!(item, Ok(Message::Close(_)))))
        .filter_map(|item| {
            future::ready(match item {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(Message::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
                Ok(_) => None,
                Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
            })
        });

    stream::iter(head).chain(body).scan(false, |failed, item| {
        if *failed {
            return future::ready(None);
        }
        *failed = item.is_err();
        future::ready(Some(item))
    })
}
