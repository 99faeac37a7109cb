//! Server-sent event decoding for streamed completions
//!
//! [`SseDecoder`] is a push-fed state machine:
//! - `Buffering`: waiting for more bytes
//! - `Framing`: splitting buffered text on blank lines into whole frames plus a remainder
//! - `Emitting`: whole frames are queued and decoded one per pull
//! - `Done`: body exhausted, sentinel seen or decode failure; terminal
//!
//! [`EventStream`] drives the decoder from a byte source and releases the
//! source on every terminating path.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const FRAME_DELIMITER: &str = "\n\n";
const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of a streamed completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamEvent {
    /// Incremental content fragment of the first choice
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Buffering,
    Framing,
    Emitting,
    Done,
}

/// Frame splitter and event decoder
#[derive(Debug)]
pub struct SseDecoder {
    state: DecoderState,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    remainder: String,
    frames: VecDeque<String>,
    exhausted: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Buffering,
            pending: Vec::new(),
            remainder: String::new(),
            frames: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// Append one raw chunk and split out every whole frame
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        if self.is_done() {
            return Ok(());
        }

        self.pending.extend_from_slice(chunk);
        let text = match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                // Incomplete sequence at the end; keep it for the next chunk
                let valid = e.valid_up_to();
                let tail = self.pending.split_off(valid);
                String::from_utf8(std::mem::replace(&mut self.pending, tail))
                    .map_err(|e| self.fail(e.to_string()))?
            }
            Err(e) => return Err(self.fail(format!("invalid utf-8 in stream: {}", e))),
        };

        self.state = DecoderState::Framing;
        self.remainder.push_str(&text);
        if self.remainder.contains('\r') {
            self.remainder = self.remainder.replace("\r\n", "\n");
        }
        self.split_frames();
        Ok(())
    }

    /// Mark the byte source exhausted; a non-empty remainder becomes the last frame
    pub fn finish(&mut self) {
        if self.exhausted || self.is_done() {
            return;
        }
        self.exhausted = true;
        if !self.pending.is_empty() {
            tracing::warn!("Dropping {} undecodable trailing bytes", self.pending.len());
            self.pending.clear();
        }
        let last = std::mem::take(&mut self.remainder);
        if !last.is_empty() {
            self.frames.push_back(last);
        }
        self.state = if self.frames.is_empty() {
            DecoderState::Done
        } else {
            DecoderState::Emitting
        };
    }

    /// Decode the next queued frame
    ///
    /// `Ok(None)` means more input is needed, or the decoder is done.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        while let Some(frame) = self.frames.pop_front() {
            let Some(payload) = frame.strip_prefix(DATA_PREFIX) else {
                tracing::trace!("Skipping non-data frame: {:?}", frame);
                continue;
            };
            let payload = payload.trim_start();
            if payload.starts_with(DONE_SENTINEL) {
                tracing::debug!("Stream sentinel received");
                self.terminate();
                return Ok(None);
            }

            return match serde_json::from_str::<StreamEvent>(payload) {
                Ok(event) => {
                    if self.frames.is_empty() {
                        self.settle();
                    }
                    Ok(Some(event))
                }
                Err(e) => Err(self.fail(format!("bad frame {:?}: {}", payload, e))),
            };
        }

        self.settle();
        Ok(None)
    }

    /// Abort decoding after a source failure
    pub fn fail(&mut self, reason: impl Into<String>) -> Error {
        self.terminate();
        Error::StreamDecode(reason.into())
    }

    fn split_frames(&mut self) {
        let mut parts: Vec<&str> = self.remainder.split(FRAME_DELIMITER).collect();
        let last = parts.pop().unwrap_or_default().to_string();
        self.frames.extend(parts.into_iter().filter(|p| !p.is_empty()).map(str::to_string));
        self.remainder = last;
        self.settle();
    }

    fn settle(&mut self) {
        self.state = if !self.frames.is_empty() {
            DecoderState::Emitting
        } else if self.exhausted {
            DecoderState::Done
        } else {
            DecoderState::Buffering
        };
    }

    fn terminate(&mut self) {
        self.state = DecoderState::Done;
        self.frames.clear();
        self.remainder.clear();
        self.pending.clear();
    }
}

type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Finite, non-restartable sequence of [`StreamEvent`]s read from a byte source
pub struct EventStream {
    source: Option<ByteSource>,
    decoder: SseDecoder,
}

impl EventStream {
    pub fn new<S, E>(source: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        let source = source.map(|chunk| chunk.map_err(|e| Error::StreamDecode(e.to_string())));
        Self {
            source: Some(Box::pin(source)),
            decoder: SseDecoder::new(),
        }
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream())
    }

    /// Whether the byte source has been let go
    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    /// Pull the next event; `Ok(None)` ends the sequence
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            match self.decoder.next_event() {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            }
            if self.decoder.is_done() {
                self.release();
                return Ok(None);
            }

            let Some(source) = self.source.as_mut() else {
                self.decoder.finish();
                continue;
            };
            match source.next().await {
                Some(Ok(chunk)) => {
                    tracing::trace!("Received {} bytes", chunk.len());
                    if let Err(e) = self.decoder.push(&chunk) {
                        self.release();
                        return Err(e);
                    }
                }
                Some(Err(e)) => {
                    self.release();
                    return Err(self.decoder.fail(e.to_string()));
                }
                None => {
                    self.release();
                    self.decoder.finish();
                }
            }
        }
    }

    /// Adapt into a [`Stream`] that ends after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent>> {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut events = state?;
            match events.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(events))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    fn release(&mut self) {
        if self.source.take().is_some() {
            tracing::trace!("Released stream body");
        }
    }
}
