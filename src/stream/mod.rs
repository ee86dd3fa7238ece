//! Live translation of backend SSE into OpenAI chunk streams.

pub mod anthropic;
pub mod kimi;
pub mod transcoder;

use crate::encode::anthropic::ToolIdMap;
use axum::response::sse::Event;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use transcoder::{Frame, StreamEvent, Transcoder};

pub const CHANNEL_CAPACITY: usize = 64;

/// An upstream error reported inside an otherwise healthy stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StreamFailure(pub String);

/// Turns one SSE event from a backend into zero or more stream events.
pub trait EventDecoder: Send {
    fn decode(&mut self, event: &str, data: &str) -> Result<Vec<StreamEvent>, StreamFailure>;
}

pub fn frame_to_event(frame: Frame) -> Option<Event> {
    match frame {
        Frame::Done => Some(Event::default().data("[DONE]")),
        Frame::Chunk(chunk) => match serde_json::to_string(&chunk) {
            Ok(json) => Some(Event::default().data(json)),
            Err(err) => {
                tracing::warn!("failed to encode chunk: {err}");
                None
            }
        },
    }
}

/// Sends frames in order. `false` once the client has gone away.
async fn send_frames(tx: &mpsc::Sender<Event>, frames: Vec<Frame>) -> bool {
    for frame in frames {
        let Some(event) = frame_to_event(frame) else {
            continue;
        };
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

/// Drives one stream to completion. Reads the next upstream event only after
/// the previous frames were accepted by the channel, and drops the upstream
/// as soon as the receiving side is closed.
pub async fn pump<S, B, E, D>(
    upstream: S,
    mut decoder: D,
    mut transcoder: Transcoder,
    ids: ToolIdMap,
    tx: mpsc::Sender<Event>,
) where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    D: EventDecoder,
{
    let mut events = Box::pin(upstream.eventsource());
    if !send_frames(&tx, transcoder.begin()).await {
        return;
    }
    while let Some(item) = events.next().await {
        let frames = match item {
            Ok(ev) => match decoder.decode(&ev.event, &ev.data) {
                Ok(decoded) => {
                    let mut frames = Vec::new();
                    for event in decoded {
                        frames.extend(transcoder.handle(event, &ids));
                    }
                    frames
                }
                Err(failure) => {
                    tracing::warn!(id = transcoder.id(), "upstream stream error: {failure}");
                    transcoder.fail(&failure.0)
                }
            },
            Err(err) => {
                tracing::warn!(id = transcoder.id(), "upstream stream read failed: {err}");
                transcoder.fail(&err.to_string())
            }
        };
        if !send_frames(&tx, frames).await {
            tracing::debug!(id = transcoder.id(), "client went away; dropping upstream stream");
            return;
        }
        if transcoder.is_done() {
            return;
        }
    }
    send_frames(&tx, transcoder.finish_incomplete()).await;
}

/// Spawns [`pump`] and returns the receiving end as the SSE body source.
pub fn spawn_pump<S, B, E, D>(
    upstream: S,
    decoder: D,
    transcoder: Transcoder,
    ids: ToolIdMap,
) -> ReceiverStream<Event>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    D: EventDecoder + 'static,
{
    let (tx, rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);
    tokio::spawn(pump(upstream, decoder, transcoder, ids, tx));
    ReceiverStream::new(rx)
}

/// A stream holding only the in-band rejection chunk and `[DONE]`.
pub fn rejected_stream(model: &str, message: &str) -> ReceiverStream<Event> {
    let frames = Transcoder::new(model).reject(message);
    let (tx, rx) = mpsc::channel::<Event>(frames.len().max(1));
    for event in frames.into_iter().filter_map(frame_to_event) {
        // Capacity covers every frame.
        let _ = tx.try_send(event);
    }
    ReceiverStream::new(rx)
}
