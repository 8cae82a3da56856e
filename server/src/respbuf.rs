//! Response assembled in memory before anything reaches the client.
//!
//! The synthesized document, the pending status and the pending headers are
//! collected here and copied to the real response in one step, after the
//! engine has finished writing. Byte ranges are cut from the finished
//! document.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use tts_core::{RandomAccessBuffer, ReadAt};

use crate::error::ApiError;

#[derive(Debug, Default)]
pub struct ResponseBuffer {
    body: RandomAccessBuffer,
    status: Option<StatusCode>,
    headers: Option<HeaderMap>,
}

/// What a `Range` header asks of a document of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Serve everything: no range, a range we ignore, or one that covers it all.
    Full,
    /// Inclusive byte positions.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Pending headers, created on first use.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.headers.get_or_insert_with(HeaderMap::new)
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&HeaderValue> {
        self.headers.as_ref().and_then(|h| h.get(name))
    }

    pub fn body(&self) -> &RandomAccessBuffer {
        &self.body
    }

    pub fn set_body(&mut self, body: RandomAccessBuffer) {
        self.body = body;
    }

    /// Narrow the document to the range the client asked for.
    ///
    /// `If-Range` must name the current validator (or the exact
    /// `Last-Modified` value) or the full document is served.
    pub fn apply_range(&mut self, range: Option<&str>, if_range: Option<&str>) -> Result<(), ApiError> {
        let Some(range) = range else {
            return Ok(());
        };
        if let Some(if_range) = if_range.map(str::trim) {
            let current = [header::ETAG, header::LAST_MODIFIED]
                .into_iter()
                .filter_map(|h| self.header(h).and_then(|v| v.to_str().ok()))
                .any(|v| v == if_range);
            if !current {
                return Ok(());
            }
        }

        let len = self.body.len();
        match parse_range(range, len) {
            RangeOutcome::Full => Ok(()),
            RangeOutcome::Unsatisfiable => Err(ApiError::RangeNotSatisfiable { len }),
            RangeOutcome::Partial { start, end } => {
                let mut part = vec![0u8; (end - start + 1) as usize];
                let n = self
                    .body
                    .read_at(&mut part, start)
                    .map_err(|e| ApiError::InternalError(format!("range read failed: {e}")))?;
                part.truncate(n);

                let content_range = HeaderValue::from_str(&format!("bytes {start}-{end}/{len}"))
                    .map_err(|e| ApiError::InternalError(e.to_string()))?;
                self.headers_mut().insert(header::CONTENT_RANGE, content_range);
                self.set_status(StatusCode::PARTIAL_CONTENT);
                self.body = RandomAccessBuffer::from(part);
                Ok(())
            }
        }
    }

    /// Copy pending headers, `Content-Length` (when there is a body) and the
    /// pending status into `target`, then the body itself unless `send_body`
    /// is false (HEAD).
    pub fn finalize(self, target: &mut Response, send_body: bool) {
        if let Some(headers) = self.headers {
            target.headers_mut().extend(headers);
        }
        if !self.body.is_empty() {
            target
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
        if let Some(status) = self.status {
            *target.status_mut() = status;
        }
        *target.body_mut() = if send_body {
            Body::from(self.body.into_inner())
        } else {
            Body::empty()
        };
    }

    pub fn into_response(self, send_body: bool) -> Response {
        let mut response = Response::new(Body::empty());
        self.finalize(&mut response, send_body);
        response
    }
}

/// Interpret a `Range` value against a document of `len` bytes.
///
/// Only a single `bytes` range is honoured; multiple ranges, other units
/// and malformed values fall back to the full document.
pub fn parse_range(value: &str, len: u64) -> RangeOutcome {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else {
        return RangeOutcome::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // Suffix: the final `n` bytes.
        let Ok(n) = last.parse::<u64>() else {
            return RangeOutcome::Full;
        };
        if n == 0 || len == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: len.saturating_sub(n),
            end: len - 1,
        };
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeOutcome::Full;
    };
    let end = if last.is_empty() {
        None
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return RangeOutcome::Full,
        }
    };
    if start >= len {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial {
        start,
        end: end.map_or(len - 1, |e| e.min(len - 1)),
    }
}
