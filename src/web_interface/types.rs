use serde::{Deserialize, Serialize};

use crate::browser_pool::types::{PoolHealth, PoolStats};
use crate::configuration::types::CourtNumber;

/// API error payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Body of `POST /api/availability`. No courts means every live court.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default)]
    pub courts: Vec<CourtNumber>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatusResponse {
    pub health: PoolHealth,
    pub stats: PoolStats,
}
