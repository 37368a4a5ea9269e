//! Trend classification over a partition's observation window.
//!
//! Classification looks at the whole window rather than the newest sample so a single
//! slow commit does not flap the status. Checks run in severity order: a rewind
//! anywhere in the window wins, then a silent consumer, then the offset/high-water
//! trend. ERROR and STALL need a full window; until then a stuck consumer is judged
//! on lag alone.

use crate::storage::BrokerOffsetState;
use crate::storage::ring::RingHistory;
use crate::storage::status::PartitionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationPolicy {
    /// Age of the newest commit beyond which a lagging partition is STOP. 0 disables.
    pub stop_threshold_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEvaluation {
    pub status: PartitionState,
    pub lag: i64,
    pub offset: i64,
    pub high_water_mark: i64,
    pub stale_high_water_mark: bool,
    pub last_commit_ms: i64,
}

pub struct LagEvaluator;

impl LagEvaluator {
    pub fn evaluate(
        ring: &RingHistory,
        broker: Option<&BrokerOffsetState>,
        policy: EvaluationPolicy,
        now_ms: i64,
    ) -> PartitionEvaluation {
        let Some(latest) = ring.latest() else {
            return PartitionEvaluation {
                status: PartitionState::Unknown,
                lag: 0,
                offset: 0,
                high_water_mark: broker.map_or(0, |b| b.high_water_mark),
                stale_high_water_mark: false,
                last_commit_ms: 0,
            };
        };

        let high_water_mark = broker.map_or_else(|| latest.high_water_mark(), |b| b.high_water_mark);
        let (lag, stale_high_water_mark) = compute_lag(high_water_mark, latest.offset);

        let mut evaluation = PartitionEvaluation {
            status: PartitionState::Unknown,
            lag,
            offset: latest.offset,
            high_water_mark,
            stale_high_water_mark,
            last_commit_ms: latest.timestamp_ms,
        };

        let Some(oldest) = ring.oldest().filter(|_| ring.len() >= 2) else {
            return evaluation;
        };

        evaluation.status = if ring.has_rewind() {
            PartitionState::Rewind
        } else if policy.stop_threshold_ms > 0
            && lag > 0
            && now_ms.saturating_sub(latest.timestamp_ms) > policy.stop_threshold_ms
        {
            PartitionState::Stop
        } else if ring.is_full() && latest.offset <= oldest.offset {
            if high_water_mark > oldest.high_water_mark() {
                PartitionState::Error
            } else {
                PartitionState::Stall
            }
        } else if lag == 0 || lag <= oldest.lag {
            PartitionState::Ok
        } else {
            PartitionState::Warn
        };

        evaluation
    }
}

/// `max(0, hwm - offset)`, plus whether the broker reading was behind the commit.
pub fn compute_lag(high_water_mark: i64, offset: i64) -> (i64, bool) {
    let raw = high_water_mark.saturating_sub(offset);
    (raw.max(0), raw < 0)
}
