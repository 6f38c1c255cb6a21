//! Streaming utilities: SSE framing and tool-call fragment accumulation.
//!
//! # SSE framing
//!
//! Both provider variants answer a streaming request with Server-Sent Events:
//!
//! ```text
//! data: {"id":"c1","object":"chat.completion.chunk","choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"id":"c1","object":"chat.completion.chunk","choices":[{"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```
//!
//! HTTP chunk boundaries do not line up with events (one read may carry half
//! an event, or three), so framing is delegated to `eventsource-stream`, which
//! buffers across reads. [`parse_sse_stream`] turns each `data:` payload into
//! a [`ChunkEvent`] and ends the sequence at `[DONE]`, at the first event that
//! carries a finish reason, or when the transport closes.
//!
//! # Tool call fragments
//!
//! Tool calls arrive as deltas keyed by a stream index:
//!
//! ```text
//! Chunk 1: tool_calls: [{ index: 0, id: "call_abc", function: { name: "get_weather" } }]
//! Chunk 2: tool_calls: [{ index: 0, function: { arguments: "{\"ci" } }]
//! Chunk 3: tool_calls: [{ index: 0, function: { arguments: "ty\":\"Paris\"}" } }]
//! Chunk 4: finish_reason: "tool_calls"
//! ```
//!
//! The provider relays these raw; [`ToolCallAccumulator`] is what the
//! orchestrator uses to stitch them back into complete [`ToolCall`]s.

use crate::types::{ChunkEvent, ToolCall, ToolCallDelta, Usage};
use crate::{Error, Result};
use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::pin::Pin;
use uuid::Uuid;

/// Finite, non-restartable sequence of stream events
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChunkEvent>> + Send>>;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Parse one SSE `data:` payload into a [`ChunkEvent`].
///
/// Only the first choice is read; the engine never asks for `n > 1`.
pub fn parse_chunk(data: &str) -> Result<ChunkEvent> {
    let chunk: WireChunk = serde_json::from_str(data)
        .map_err(|e| Error::stream(format!("Failed to parse chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(Error::stream(format!("Provider reported an error: {}", message)));
    }

    let mut event = ChunkEvent {
        usage: chunk.usage,
        ..ChunkEvent::default()
    };

    if let Some(choice) = chunk.choices.into_iter().next() {
        event.finish_reason = choice.finish_reason;
        let delta = choice.delta.unwrap_or_default();
        event.content = delta.content.filter(|c| !c.is_empty());
        event.tool_call_deltas = delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments_fragment) = match tc.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                ToolCallDelta {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments_fragment,
                }
            })
            .collect();
    }

    Ok(event)
}

/// Turn a streaming HTTP response into a [`ChunkStream`].
pub fn parse_sse_stream(response: reqwest::Response) -> ChunkStream {
    parse_event_stream(response.bytes_stream())
}

/// Same as [`parse_sse_stream`] for any byte stream; lets tests feed
/// hand-split chunks.
pub fn parse_event_stream<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display + Send + 'static,
{
    let events = bytes
        .eventsource()
        .take_while(|item| {
            let done = matches!(item, Ok(event) if event.data.trim() == DONE_SENTINEL);
            future::ready(!done)
        })
        .filter_map(|item| async move {
            match item {
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => Some(parse_chunk(&event.data)),
                Err(e) => Some(Err(Error::stream(e.to_string()))),
            }
        })
        .scan(false, |finished, item| {
            if *finished {
                return future::ready(None);
            }
            if let Ok(event) = &item {
                if event.finish_reason.is_some() {
                    *finished = true;
                }
            }
            future::ready(Some(item))
        });

    Box::pin(events)
}

/// Stitches tool-call deltas back into complete calls.
///
/// Deltas are grouped by their stream index. Per index, `arguments` fragments
/// are concatenated in arrival order, while `id` and `name` keep the first
/// non-empty value seen. Empty argument fragments are ignored.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_default();

        if entry.id.is_none() {
            entry.id = delta.id.clone().filter(|id| !id.is_empty());
        }
        if entry.name.is_none() {
            entry.name = delta.name.clone().filter(|name| !name.is_empty());
        }
        if let Some(fragment) = delta.arguments_fragment.as_deref() {
            entry.arguments.push_str(fragment);
        }
    }

    pub fn push_all<'a>(&mut self, deltas: impl IntoIterator<Item = &'a ToolCallDelta>) {
        for delta in deltas {
            self.push(delta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Complete calls in stream-index order.
    ///
    /// A call whose id never arrived gets a generated one so its result can
    /// still be linked; a missing name is left empty and fails resolution.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|partial| {
                let id = partial
                    .id
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                ToolCall::new(id, partial.name.unwrap_or_default(), partial.arguments)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn delta(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments_fragment: args.map(str::to_string),
        }
    }

    fn bytes_stream(parts: Vec<&'static str>) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> + Send {
        stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    #[test]
    fn test_parse_content_chunk() {
        let event = parse_chunk(
            r#"{"id":"c1","object":"chat.completion.chunk","created":0,"model":"m","choices":[{"index":0,"delta":{"role":"assistant","content":"Hello"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(event.content.as_deref(), Some("Hello"));
        assert!(event.tool_call_deltas.is_empty());
        assert!(event.finish_reason.is_none());
    }

    #[test]
    fn test_parse_tool_call_chunk() {
        let event = parse_chunk(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":"{\"ci"}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(
            event.tool_call_deltas,
            vec![delta(1, Some("call_1"), Some("get_weather"), Some("{\"ci"))]
        );
    }

    #[test]
    fn test_parse_azure_prompt_filter_chunk() {
        // Azure opens with a chunk that has no choices
        let event = parse_chunk(r#"{"choices":[],"prompt_filter_results":[]}"#).unwrap();
        assert_eq!(event, ChunkEvent::default());
    }

    #[test]
    fn test_parse_usage_and_finish() {
        let event = parse_chunk(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        )
        .unwrap();
        assert_eq!(event.finish_reason.as_deref(), Some("stop"));
        assert_eq!(event.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn test_parse_error_payload() {
        let err = parse_chunk(r#"{"error":{"message":"rate limited"}}"#).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert!(parse_chunk("not json").is_err());
    }

    #[tokio::test]
    async fn test_event_stream_handles_split_events() {
        let parts = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel",
            "lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ];
        let events: Vec<ChunkEvent> = parse_event_stream(bytes_stream(parts))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].content.as_deref(), Some("Hello"));
        assert_eq!(events[1].content.as_deref(), Some(" world"));
        assert_eq!(events[2].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_event_stream_stops_at_done() {
        let parts = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        ];
        let events: Vec<_> = parse_event_stream(bytes_stream(parts)).collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_event_stream_stops_after_finish_reason() {
        let parts = vec![
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ];
        let events: Vec<_> = parse_event_stream(bytes_stream(parts)).collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_event_stream_ends_on_transport_close() {
        let parts = vec![": keep-alive\n\n", "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"];
        let events: Vec<_> = parse_event_stream(bytes_stream(parts)).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[test]
    fn test_accumulator_concatenates_arguments() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, Some("call_123"), Some("get_weather"), Some("")));
        acc.push(&delta(0, None, None, Some("{\"city\":")));
        acc.push(&delta(0, None, None, None));
        acc.push(&delta(0, None, None, Some("\"Paris\"}")));

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_123");
        assert_eq!(calls[0].name(), "get_weather");
        assert_eq!(calls[0].arguments(), "{\"city\":\"Paris\"}");
    }

    #[test]
    fn test_accumulator_first_non_empty_id_and_name() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, Some(""), Some(""), None));
        acc.push(&delta(0, Some("call_1"), Some("search"), None));
        acc.push(&delta(0, Some("call_1"), Some("search"), Some("{}")));

        let calls = acc.finish();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name(), "search");
        assert_eq!(calls[0].arguments(), "{}");
    }

    #[test]
    fn test_accumulator_interleaved_indices_keep_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(1, Some("call_b"), Some("calculate"), None));
        acc.push(&delta(0, Some("call_a"), Some("search"), None));
        acc.push(&delta(0, None, None, Some("{\"q\":\"rust\"}")));
        acc.push(&delta(1, None, None, Some("{\"expr\":\"2+2\"}")));
        assert_eq!(acc.len(), 2);

        let calls = acc.finish();
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].arguments(), "{\"expr\":\"2+2\"}");
    }

    #[test]
    fn test_accumulator_generates_missing_id() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, None, Some("ping"), Some("{}")));
        let calls = acc.finish();
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].call_type, "function");
    }

    #[test]
    fn test_accumulator_split_invariance() {
        let arguments = r#"{"city":"Paris","units":"metric","days":[1,2,3]}"#;

        let mut whole = ToolCallAccumulator::new();
        whole.push(&delta(0, Some("call_x"), Some("forecast"), Some(arguments)));
        let expected = whole.finish();

        for split in 0..=arguments.len() {
            for second_split in split..=arguments.len() {
                let mut acc = ToolCallAccumulator::new();
                acc.push(&delta(0, Some("call_x"), None, Some(&arguments[..split])));
                acc.push(&delta(0, None, Some("forecast"), Some(&arguments[split..second_split])));
                acc.push(&delta(0, None, None, Some(&arguments[second_split..])));
                assert_eq!(acc.finish(), expected, "split at {split}/{second_split}");
            }
        }
    }
}
