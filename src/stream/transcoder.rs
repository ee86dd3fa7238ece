use crate::encode::anthropic::ToolIdMap;
use crate::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionDelta, ToolCallDelta, completion_id,
    now_ts, tool_call_id,
};
use std::collections::HashMap;

/// One backend stream event, already decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolStart {
        block: u64,
        id: Option<String>,
        name: String,
    },
    ToolArgs {
        block: u64,
        fragment: String,
    },
    Metadata {
        stop_reason: Option<String>,
    },
    End,
}

/// What the transcoder hands to the transport, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Chunk(ChatCompletionChunk),
    /// The `[DONE]` sentinel. Always the last frame of a stream.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Streaming,
    Done,
}

/// Per-stream state that turns backend events into `chat.completion.chunk`s.
#[derive(Debug)]
pub struct Transcoder {
    id: String,
    model: String,
    phase: Phase,
    slot_by_block: HashMap<u64, usize>,
    // Indexed by slot; slots are handed out sequentially.
    arguments: Vec<String>,
    stop_reason: Option<String>,
}

impl Transcoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            model: model.into(),
            phase: Phase::Init,
            slot_by_block: HashMap::new(),
            arguments: Vec::new(),
            stop_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Arguments accumulated so far for a tool slot.
    pub fn arguments(&self, slot: usize) -> Option<&str> {
        self.arguments.get(slot).map(String::as_str)
    }

    /// Enters `Streaming` and emits the role-only chunk. No-op afterwards.
    pub fn begin(&mut self) -> Vec<Frame> {
        if self.phase != Phase::Init {
            return Vec::new();
        }
        self.phase = Phase::Streaming;
        vec![self.chunk(
            ChunkDelta {
                role: Some("assistant".to_string()),
                ..Default::default()
            },
            None,
        )]
    }

    pub fn handle(&mut self, event: StreamEvent, ids: &ToolIdMap) -> Vec<Frame> {
        if self.phase == Phase::Done {
            return Vec::new();
        }
        let mut frames = self.begin();
        match event {
            StreamEvent::TextDelta(text) => {
                if !text.is_empty() {
                    frames.push(self.chunk(
                        ChunkDelta {
                            content: Some(text),
                            ..Default::default()
                        },
                        None,
                    ));
                }
            }
            StreamEvent::ToolStart { block, id, name } => {
                let slot = self.arguments.len();
                self.arguments.push(String::new());
                self.slot_by_block.insert(block, slot);
                let id = match id {
                    Some(id) if !id.is_empty() => ids.client_id(&id).to_string(),
                    _ => tool_call_id(),
                };
                frames.push(self.tool_chunk(ToolCallDelta {
                    index: slot,
                    id: Some(id),
                    call_type: Some("function".to_string()),
                    function: FunctionDelta {
                        name: Some(name),
                        arguments: None,
                    },
                }));
            }
            StreamEvent::ToolArgs { block, fragment } => {
                let Some(&slot) = self.slot_by_block.get(&block) else {
                    tracing::debug!(block, "argument fragment for unknown tool block ignored");
                    return frames;
                };
                if let Some(buffer) = self.arguments.get_mut(slot) {
                    buffer.push_str(&fragment);
                }
                frames.push(self.tool_chunk(ToolCallDelta {
                    index: slot,
                    id: None,
                    call_type: None,
                    function: FunctionDelta {
                        name: None,
                        arguments: Some(fragment),
                    },
                }));
            }
            StreamEvent::Metadata { stop_reason } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
            }
            StreamEvent::End => frames.extend(self.terminate()),
        }
        frames
    }

    /// The upstream broke mid-stream. The error is reported in-band, then
    /// the stream is closed normally.
    pub fn fail(&mut self, message: &str) -> Vec<Frame> {
        match self.phase {
            Phase::Done => Vec::new(),
            Phase::Init => self.reject(message),
            Phase::Streaming => {
                let mut frames = vec![self.error_chunk(message)];
                frames.extend(self.terminate());
                frames
            }
        }
    }

    /// The upstream closed without a stream-end event.
    pub fn finish_incomplete(&mut self) -> Vec<Frame> {
        match self.phase {
            Phase::Done => Vec::new(),
            Phase::Init => self.reject("upstream closed the stream before sending any data"),
            Phase::Streaming => {
                tracing::debug!(id = %self.id, "upstream stream ended without a stop event");
                self.terminate()
            }
        }
    }

    /// The upstream refused the stream before any event. Skips `Streaming`.
    pub fn reject(&mut self, message: &str) -> Vec<Frame> {
        if self.phase == Phase::Done {
            return Vec::new();
        }
        self.phase = Phase::Done;
        vec![self.error_chunk(message), Frame::Done]
    }

    fn terminate(&mut self) -> Vec<Frame> {
        self.phase = Phase::Done;
        let finish_reason = if self.arguments.is_empty() {
            "stop"
        } else {
            "tool_calls"
        };
        tracing::debug!(
            id = %self.id,
            stop_reason = self.stop_reason.as_deref().unwrap_or("none"),
            finish_reason,
            "stream finished"
        );
        vec![
            self.chunk(ChunkDelta::default(), Some(finish_reason.to_string())),
            Frame::Done,
        ]
    }

    fn error_chunk(&self, message: &str) -> Frame {
        self.chunk(
            ChunkDelta {
                content: Some(format!("Error: {message}")),
                ..Default::default()
            },
            None,
        )
    }

    fn tool_chunk(&self, call: ToolCallDelta) -> Frame {
        self.chunk(
            ChunkDelta {
                tool_calls: Some(vec![call]),
                ..Default::default()
            },
            None,
        )
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> Frame {
        Frame::Chunk(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: now_ts(),
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
                logprobs: None,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: Vec<StreamEvent>) -> (Transcoder, Vec<Frame>) {
        let ids = ToolIdMap::default();
        let mut t = Transcoder::new("claude-3-haiku-20240307");
        let mut frames = t.begin();
        for ev in events {
            frames.extend(t.handle(ev, &ids));
        }
        (t, frames)
    }

    fn delta(frame: &Frame) -> &ChunkDelta {
        match frame {
            Frame::Chunk(c) => &c.choices[0].delta,
            Frame::Done => panic!("expected chunk"),
        }
    }

    fn finish(frame: &Frame) -> Option<&str> {
        match frame {
            Frame::Chunk(c) => c.choices[0].finish_reason.as_deref(),
            Frame::Done => panic!("expected chunk"),
        }
    }

    #[test]
    fn tool_call_fragments_stream_in_order() {
        let (t, frames) = run(vec![
            StreamEvent::ToolStart {
                block: 0,
                id: Some("toolu_1".to_string()),
                name: "calc".to_string(),
            },
            StreamEvent::ToolArgs {
                block: 0,
                fragment: "{\"x\":".to_string(),
            },
            StreamEvent::ToolArgs {
                block: 0,
                fragment: "1}".to_string(),
            },
            StreamEvent::Metadata {
                stop_reason: Some("tool_use".to_string()),
            },
            StreamEvent::End,
        ]);

        assert_eq!(frames.len(), 6);
        assert_eq!(delta(&frames[0]).role.as_deref(), Some("assistant"));

        let start = &delta(&frames[1]).tool_calls.as_ref().unwrap()[0];
        assert_eq!(start.index, 0);
        assert_eq!(start.id.as_deref(), Some("toolu_1"));
        assert_eq!(start.call_type.as_deref(), Some("function"));
        assert_eq!(start.function.name.as_deref(), Some("calc"));

        let a1 = &delta(&frames[2]).tool_calls.as_ref().unwrap()[0];
        let a2 = &delta(&frames[3]).tool_calls.as_ref().unwrap()[0];
        assert_eq!(a1.function.arguments.as_deref(), Some("{\"x\":"));
        assert_eq!(a2.function.arguments.as_deref(), Some("1}"));
        assert_eq!(a1.id, None);

        assert_eq!(delta(&frames[4]), &ChunkDelta::default());
        assert_eq!(finish(&frames[4]), Some("tool_calls"));
        assert_eq!(frames[5], Frame::Done);
        assert_eq!(t.arguments(0), Some("{\"x\":1}"));
        assert!(t.is_done());
    }

    #[test]
    fn text_deltas_keep_count_and_order() {
        let texts = ["a", "bc", "", "d"];
        let (_, frames) = run(texts
            .iter()
            .map(|s| StreamEvent::TextDelta(s.to_string()))
            .chain([StreamEvent::End])
            .collect());
        let content: Vec<_> = frames[1..frames.len() - 2]
            .iter()
            .map(|f| delta(f).content.clone().unwrap())
            .collect();
        assert_eq!(content, vec!["a", "bc", "d"]);
        assert_eq!(finish(&frames[frames.len() - 2]), Some("stop"));
        assert_eq!(frames.last(), Some(&Frame::Done));
        assert_eq!(frames.iter().filter(|f| **f == Frame::Done).count(), 1);
    }

    #[test]
    fn shared_id_across_chunks() {
        let (t, frames) = run(vec![StreamEvent::TextDelta("x".to_string()), StreamEvent::End]);
        for f in &frames {
            if let Frame::Chunk(c) = f {
                assert_eq!(c.id, t.id());
                assert_eq!(c.object, "chat.completion.chunk");
            }
        }
    }

    #[test]
    fn fragments_for_unknown_blocks_are_ignored() {
        let (t, frames) = run(vec![StreamEvent::ToolArgs {
            block: 7,
            fragment: "{}".to_string(),
        }]);
        assert_eq!(frames.len(), 1);
        assert_eq!(t.arguments(0), None);
    }

    #[test]
    fn nothing_after_done() {
        let (mut t, _) = run(vec![StreamEvent::End]);
        let ids = ToolIdMap::default();
        assert!(t.handle(StreamEvent::TextDelta("late".to_string()), &ids).is_empty());
        assert!(t.fail("late").is_empty());
        assert!(t.finish_incomplete().is_empty());
    }

    #[test]
    fn mid_stream_failure_reports_then_terminates() {
        let (mut t, _) = run(vec![StreamEvent::ToolStart {
            block: 1,
            id: None,
            name: "f".to_string(),
        }]);
        let frames = t.fail("connection reset");
        assert_eq!(frames.len(), 3);
        assert_eq!(delta(&frames[0]).content.as_deref(), Some("Error: connection reset"));
        assert_eq!(finish(&frames[1]), Some("tool_calls"));
        assert_eq!(frames[2], Frame::Done);
    }

    #[test]
    fn premature_close_still_terminates() {
        let (mut t, _) = run(vec![StreamEvent::TextDelta("partial".to_string())]);
        let frames = t.finish_incomplete();
        assert_eq!(finish(&frames[0]), Some("stop"));
        assert_eq!(frames[1], Frame::Done);
    }

    #[test]
    fn rejection_skips_streaming() {
        let mut t = Transcoder::new("kimi");
        let frames = t.reject("Anthropic upstream status 401: bad key");
        assert_eq!(frames.len(), 2);
        let d = delta(&frames[0]);
        assert_eq!(d.role, None);
        assert_eq!(
            d.content.as_deref(),
            Some("Error: Anthropic upstream status 401: bad key")
        );
        assert_eq!(finish(&frames[0]), None);
        assert_eq!(frames[1], Frame::Done);
        assert!(t.begin().is_empty());
    }

    #[test]
    fn generated_ids_when_backend_omits_one() {
        let (_, frames) = run(vec![StreamEvent::ToolStart {
            block: 0,
            id: None,
            name: "f".to_string(),
        }]);
        let call = &delta(&frames[1]).tool_calls.as_ref().unwrap()[0];
        assert!(call.id.as_deref().unwrap().starts_with("call_"));
    }
}
