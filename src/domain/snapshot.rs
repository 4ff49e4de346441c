//! Point-in-time aggregate state used to shorten event replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::event::AggregateType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: Uuid,
    pub aggregate_type: AggregateType,
    pub version: u64,
    pub state: Value,
    pub timestamp: DateTime<Utc>,
}
