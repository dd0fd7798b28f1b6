use lookalike_core::NextStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct LiveResponse {
    pub(crate) status: &'static str,
    pub(crate) uptime_ms: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadyChecks {
    pub(crate) index_loaded: bool,
    pub(crate) entries: usize,
    pub(crate) dimension: usize,
    pub(crate) categories: usize,
    pub(crate) sessions: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadyResponse {
    pub(crate) status: &'static str,
    pub(crate) uptime_ms: u64,
    pub(crate) checks: ReadyChecks,
}

#[derive(Debug, Serialize)]
pub(crate) struct MatchSummary {
    pub(crate) identifier: String,
    pub(crate) category: String,
    pub(crate) distance: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct MatchResponse {
    pub(crate) session_token: String,
    pub(crate) identifier: String,
    pub(crate) category: String,
    pub(crate) distance: f32,
    pub(crate) runners_up: Vec<MatchSummary>,
}

/// Optional body of `POST /next`. The query image reference is echoed back
/// untouched so a client can keep rendering the original upload.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct NextRequest {
    #[serde(default)]
    pub(crate) query_image: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NextResponse {
    pub(crate) session_token: String,
    pub(crate) identifier: String,
    pub(crate) category: String,
    pub(crate) status: NextStatus,
    pub(crate) query_image: Option<serde_json::Value>,
}
