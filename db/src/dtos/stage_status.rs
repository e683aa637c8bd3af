use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(sqlx::Type, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[sqlx(type_name = "stage_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}
