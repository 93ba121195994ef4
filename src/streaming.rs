//! Streaming infrastructure for chat responses.
//!
//! [`ChunkStream`] abstracts over chunked byte sources (a live HTTP response
//! body, or a scripted source in tests) so the reader logic behaves
//! identically for both. [`StreamingResponseReader`] drives a source through a
//! [`ChunkDecoder`] and yields cumulative text snapshots: each emission is the
//! full accumulated text so far, and consumers replace rather than append.

use async_trait::async_trait;
use reqwest::Response;

use crate::decoder::ChunkDecoder;
use crate::types::ChatError;

/// Source of response body chunks.
#[async_trait]
pub trait ChunkStream: Send {
    /// Next chunk of bytes, `Ok(None)` on end-of-data.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError>;
}

#[async_trait]
impl ChunkStream for Box<dyn ChunkStream> {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
        (**self).next_chunk().await
    }
}

/// Live HTTP response body.
pub struct HttpChunkStream {
    response: Response,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChatError> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(ChatError::Transport(e.to_string())),
        }
    }
}

/// Reads a chunk source to completion, one cumulative snapshot at a time.
///
/// A reader is tied to a single request: it is not resumable after an error or
/// after end-of-data, and `finish()` is called on its decoder exactly once,
/// after the last chunk, to flush trailing partial bytes.
pub struct StreamingResponseReader<S> {
    source: S,
    decoder: ChunkDecoder,
    text: String,
    done: bool,
    received_any: bool,
}

impl<S: ChunkStream> StreamingResponseReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            decoder: ChunkDecoder::new(),
            text: String::new(),
            done: false,
            received_any: false,
        }
    }

    /// The full accumulated text after the next completed fragment, or
    /// `Ok(None)` once the source has ended. A chunk that completes no code
    /// point (a split multi-byte sequence) does not produce an emission; the
    /// reader keeps pulling.
    ///
    /// A transport failure before any data arrived surfaces as
    /// [`ChatError::Transport`]; one after the stream started surfaces as
    /// [`ChatError::PrematureEnd`]. Both are terminal for this reader.
    pub async fn next_snapshot(&mut self) -> Result<Option<&str>, ChatError> {
        if self.done {
            return Ok(None);
        }
        loop {
            match self.source.next_chunk().await {
                Ok(Some(chunk)) => {
                    self.received_any = true;
                    let fragment = self.decoder.feed(&chunk);
                    if fragment.is_empty() {
                        continue;
                    }
                    self.text.push_str(&fragment);
                    return Ok(Some(self.text.as_str()));
                }
                Ok(None) => {
                    self.done = true;
                    let tail = self.decoder.finish();
                    if tail.is_empty() {
                        return Ok(None);
                    }
                    self.text.push_str(&tail);
                    return Ok(Some(self.text.as_str()));
                }
                Err(ChatError::Transport(reason)) if self.received_any => {
                    self.done = true;
                    return Err(ChatError::PrematureEnd(reason));
                }
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
    }

    /// Accumulated text so far.
    pub fn text(&self) -> &str {
        &self.text
    }
}
