//! Streamed edit consumption
//!
//! Reduces an [`EditStream`] to its final list of replacements. Deltas are
//! fragments of a JSON document of the form
//! `{"replacements": [{"old": "...", "new": "..."}]}`; each one counts as a
//! token for progress reporting.

use futures::StreamExt;
use planbuild_core::{ComputeError, EditChunk, EditStream, Replacement};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct ReplacementsPayload {
    replacements: Vec<Replacement>,
}

/// Final outcome of a consumed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedEdit {
    /// Decoded replacements
    pub replacements: Vec<Replacement>,
    /// Deltas received
    pub num_tokens: usize,
}

/// Decode the JSON document accumulated from deltas
///
/// # Errors
/// `ComputeError::MalformedResult` if `raw` is not a replacements document
pub fn parse_replacements(raw: &str) -> Result<Vec<Replacement>, ComputeError> {
    serde_json::from_str::<ReplacementsPayload>(raw)
        .map(|payload| payload.replacements)
        .map_err(|e| ComputeError::MalformedResult(e.to_string()))
}

/// Drain `stream` to its final replacements
///
/// `on_progress` is called with the running token count after every delta.
/// A `Complete` chunk ends consumption immediately.
///
/// # Errors
/// - `ComputeError::Cancelled` if `cancel` fires first
/// - any error yielded by the stream
/// - `ComputeError::MalformedResult` if the accumulated deltas do not decode
pub async fn consume_edit_stream<F>(
    mut stream: EditStream,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<ConsumedEdit, ComputeError>
where
    F: FnMut(usize),
{
    let mut buffer = String::new();
    let mut num_tokens = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ComputeError::Cancelled),
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(EditChunk::Delta(delta))) => {
                buffer.push_str(&delta);
                num_tokens += 1;
                on_progress(num_tokens);
            }
            Some(Ok(EditChunk::Complete(replacements))) => {
                return Ok(ConsumedEdit {
                    replacements,
                    num_tokens,
                });
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    if buffer.trim().is_empty() {
        return Err(ComputeError::MalformedResult("stream ended without a result".into()));
    }

    Ok(ConsumedEdit {
        replacements: parse_replacements(&buffer)?,
        num_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn deltas(parts: &[&str]) -> EditStream {
        let chunks: Vec<Result<EditChunk, ComputeError>> = parts
            .iter()
            .map(|p| Ok(EditChunk::Delta((*p).to_owned())))
            .collect();
        stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn accumulates_deltas_and_reports_progress() {
        let stream = deltas(&[
            r#"{"replacements":[{"old":"a","#,
            r#""new":"b"}]}"#,
        ]);
        let mut seen = Vec::new();

        let edit = consume_edit_stream(stream, &CancellationToken::new(), |n| seen.push(n))
            .await
            .unwrap();

        assert_eq!(edit.replacements, vec![Replacement::new("a", "b")]);
        assert_eq!(edit.num_tokens, 2);
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn complete_chunk_short_circuits() {
        let chunks = vec![
            Ok(EditChunk::Delta("ignored".into())),
            Ok(EditChunk::Complete(vec![Replacement::new("x", "y")])),
            Err(ComputeError::Stream("never reached".into())),
        ];

        let edit = consume_edit_stream(stream::iter(chunks).boxed(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(edit.replacements.len(), 1);
        assert_eq!(edit.num_tokens, 1);
    }

    #[tokio::test]
    async fn stream_error_propagates() {
        let chunks = vec![
            Ok(EditChunk::Delta("{".into())),
            Err(ComputeError::Stream("connection reset".into())),
        ];

        let err = consume_edit_stream(stream::iter(chunks).boxed(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, ComputeError::Stream("connection reset".into()));
    }

    #[tokio::test]
    async fn malformed_json_is_reported() {
        let err = consume_edit_stream(deltas(&["not json"]), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::MalformedResult(_)));
    }

    #[tokio::test]
    async fn empty_stream_is_malformed() {
        let err = consume_edit_stream(deltas(&[]), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::MalformedResult(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_pending_stream() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = consume_edit_stream(stream::pending().boxed(), &cancel, |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, ComputeError::Cancelled);
    }
}
