// 📡 Station - the single record type managed by the service
//
// A station pairs a measured value (`actual`) with a goal (`target`).
// `id` is the public identifier used by the HTTP routes; it is drawn at random
// and is NOT unique. The store distinguishes rows by `record_id` (`_id`).

use chrono::{DateTime, SubsecRound, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Range for randomly drawn public ids
pub const ID_RANGE: RangeInclusive<i64> = 1..=10_000;

/// Range for randomly drawn `actual` / `target` values
pub const VALUE_RANGE: RangeInclusive<i64> = 1..=100;

// ============================================================================
// STATION (persisted)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Store-assigned key (UUID v4), unique per row
    #[serde(rename = "_id")]
    pub record_id: String,

    pub id: i64,
    pub date: DateTime<Utc>,
    pub actual: i64,
    pub target: i64,
}

// ============================================================================
// NEW STATION (not yet persisted)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStation {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub actual: i64,
    pub target: i64,
}

impl NewStation {
    pub fn new(id: i64, actual: i64, target: i64) -> Self {
        NewStation {
            id,
            date: now_millis(),
            actual,
            target,
        }
    }

    /// Draw id, actual and target from their ranges; date is now
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        NewStation::new(
            rng.gen_range(ID_RANGE),
            rng.gen_range(VALUE_RANGE),
            rng.gen_range(VALUE_RANGE),
        )
    }

    /// Attach the store key
    pub fn into_station(self, record_id: String) -> Station {
        Station {
            record_id,
            id: self.id,
            date: self.date,
            actual: self.actual,
            target: self.target,
        }
    }
}

// ============================================================================
// UPDATE + ACKNOWLEDGMENTS
// ============================================================================

/// Body of `PATCH /stations/:id`. Only the fields present are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationUpdate {
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<i64>,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl StationUpdate {
    pub fn new(actual: Option<i64>, date: Option<DateTime<Utc>>) -> Self {
        StationUpdate {
            actual,
            date: date.map(|d| d.trunc_subsecs(3)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAck {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

impl UpdateAck {
    pub fn new(matched_count: u64, modified_count: u64) -> Self {
        UpdateAck {
            acknowledged: true,
            matched_count,
            modified_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAck {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl DeleteAck {
    pub fn new(deleted_count: u64) -> Self {
        DeleteAck {
            acknowledged: true,
            deleted_count,
        }
    }
}

/// Timestamps are kept at millisecond precision so stored and returned values compare equal
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
