//! Server-sent events decoding for OpenAI-style streaming responses.

use super::openai::OpenAiUsage;
use crate::error::{ConversionError, KernelError};
use crate::streaming::{StreamingContent, StreamingResult};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

enum SseLine {
    Skip,
    Done,
    Data(StreamChunk),
}

fn parse_line(line: &str) -> Result<SseLine, ConversionError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        if !line.is_empty() {
            tracing::debug!("skipping SSE line: {}", line);
        }
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    Ok(SseLine::Data(serde_json::from_str(data)?))
}

fn chunk_contents(chunk: StreamChunk, model_sent: &mut bool) -> Vec<StreamingContent> {
    let mut contents = Vec::new();
    if let Some(model) = chunk.model.filter(|_| !*model_sent) {
        *model_sent = true;
        contents.push(StreamingContent::ModelId(model));
    }
    for delta in chunk
        .choices
        .unwrap_or_default()
        .into_iter()
        .filter_map(|choice| choice.delta)
    {
        if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
            contents.push(StreamingContent::Text(text));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            contents.push(StreamingContent::FunctionCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }
    if let Some(usage) = chunk.usage {
        contents.push(StreamingContent::Usage(usage.into()));
    }
    contents
}

/// Decodes an OpenAI-style SSE byte stream into streaming chunks.
///
/// Lines may be split across byte chunks. The stream ends at `data: [DONE]` or when
/// the input ends. A transport error or a malformed event ends the stream with an error.
pub fn decode_openai_stream<S, E>(input: S) -> StreamingResult
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut input = Box::pin(input);
        let mut buffer = Vec::<u8>::new();
        let mut model_sent = false;
        let mut finished = false;

        while !finished {
            let tail = match input.next().await {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    false
                }
                Some(Err(err)) => {
                    yield Err(KernelError::Service(err.to_string()));
                    break;
                }
                None => true,
            };

            loop {
                let line = match buffer.iter().position(|b| *b == b'\n') {
                    Some(pos) => buffer.drain(..=pos).collect::<Vec<_>>(),
                    None if tail && !buffer.is_empty() => std::mem::take(&mut buffer),
                    None => break,
                };
                let parsed = String::from_utf8(line)
                    .map_err(|err| KernelError::Service(err.to_string()))
                    .and_then(|line| parse_line(&line).map_err(KernelError::from));
                match parsed {
                    Ok(SseLine::Skip) => {}
                    Ok(SseLine::Done) => {
                        finished = true;
                        break;
                    }
                    Ok(SseLine::Data(chunk)) => {
                        for content in chunk_contents(chunk, &mut model_sent) {
                            yield Ok(content);
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        finished = true;
                        break;
                    }
                }
            }
            if tail {
                break;
            }
        }
    })
}
