//! Line-delimited JSON decoding over an async byte stream.

use std::io;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const LINE_SNIPPET_LEN: usize = 120;

/// Errors that end a stream's read-loop.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The underlying connection failed while reading.
    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),

    /// A line was not a valid message. The stream is not recoverable past it.
    #[error("invalid stream line `{line}`: {source}")]
    Json {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads one JSON object per line from `R` and decodes it into `T`.
///
/// The final record may omit its trailing newline. Blank lines are skipped.
#[derive(Debug)]
pub struct LineDecoder<R, T> {
    reader: R,
    line: String,
    _message: PhantomData<fn() -> T>,
}

impl<R, T> LineDecoder<R, T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            _message: PhantomData,
        }
    }

    /// Returns the next decoded message, or `None` once the stream ends.
    ///
    /// Not cancel safe: a partially read line is lost if the future is
    /// dropped, so only abandon it together with the decoder.
    pub async fn next_message(&mut self) -> Result<Option<T>, DecodeError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }

            let record = self.line.trim();
            if record.is_empty() {
                continue;
            }

            return serde_json::from_str(record)
                .map(Some)
                .map_err(|source| DecodeError::Json {
                    line: record.chars().take(LINE_SNIPPET_LEN).collect(),
                    source,
                });
        }
    }
}
