use serde::{Deserialize, Serialize};

use crate::meals::MealRecord;

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    /// `true` when `data.analysis` is the fallback record.
    pub degraded: bool,
    pub data: MealRecord,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}
