use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(sqlx::Type, Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[sqlx(type_name = "exec_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
