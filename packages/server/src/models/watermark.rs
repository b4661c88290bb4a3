use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a leaked mark was issued to.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecodedWatermarkResponse {
    pub viewer_id: String,
    pub issued_at: DateTime<Utc>,
}
