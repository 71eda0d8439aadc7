//! Trace propagation for remote requests.
//!
//! Remote config forwards the trace id and parent span id of the operator
//! action that produced a request, in decimal form. When they are missing or
//! malformed the request starts a new root trace.

use chrono::Utc;
use tracing::{Span, debug, info_span};

use crate::remote::RemoteApiRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u64,
    /// `None` for a root trace.
    pub parent_span_id: Option<u64>,
}

impl TraceContext {
    pub fn extract(trace_id: &str, parent_span_id: &str) -> Result<Self, String> {
        let trace_id = parse_id(trace_id).map_err(|e| format!("invalid trace id: {}", e))?;
        let parent_span_id =
            parse_id(parent_span_id).map_err(|e| format!("invalid parent span id: {}", e))?;
        Ok(Self {
            trace_id,
            parent_span_id: Some(parent_span_id),
        })
    }

    pub fn for_request(request: &RemoteApiRequest) -> Self {
        match Self::extract(&request.trace_id, &request.parent_span_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!(request_id = %request.id, "failed to extract span context from request: {}", e);
                Self::root(&request.id)
            }
        }
    }

    /// New root trace with an id derived from `seed` and the current time.
    pub fn root(seed: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(seed.as_bytes());
        hasher.update(&Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest.as_bytes()[..8]);
        Self {
            trace_id: u64::from_le_bytes(id).max(1),
            parent_span_id: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn span(&self, request: &RemoteApiRequest) -> Span {
        info_span!(
            "remote_request",
            request_id = %request.id,
            package = %request.package,
            method = %request.method,
            trace_id = self.trace_id,
            parent_span_id = ?self.parent_span_id,
        )
    }
}

fn parse_id(value: &str) -> Result<u64, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty".to_string());
    }
    match value.parse::<u64>() {
        Ok(0) => Err("zero".to_string()),
        Ok(id) => Ok(id),
        Err(e) => Err(e.to_string()),
    }
}
