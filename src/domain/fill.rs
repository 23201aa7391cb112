//! Broker execution reports.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};

/// One execution against an order. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub broker_exec_id: String,
    pub ts: TimeMs,
    pub qty: i64,
    pub price: Decimal,
    pub fee: Decimal,
    pub tax: Decimal,
    pub seq: i64,
}

impl Fill {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        broker_exec_id: impl Into<String>,
        ts: TimeMs,
        qty: i64,
        price: Decimal,
        fee: Decimal,
        tax: Decimal,
        seq: i64,
    ) -> Self {
        let order_id = order_id.into();
        let broker_exec_id = broker_exec_id.into();
        let fill_id = Self::compute_fill_id(&order_id, &broker_exec_id, seq);
        Fill {
            fill_id,
            order_id,
            broker_exec_id,
            ts,
            qty,
            price,
            fee,
            tax,
            seq,
        }
    }

    /// Stable id over the dedup key, so a re-delivered execution maps to the same row.
    pub fn compute_fill_id(order_id: &str, broker_exec_id: &str, seq: i64) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(order_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(broker_exec_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(seq.to_le_bytes());
        let hash = hasher.finalize();
        format!("fill:{}", hex::encode(&hash[..16]))
    }
}

/// Position of the fill poller in the broker's execution stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FillCursor {
    pub last_ts: TimeMs,
    pub last_seq: i64,
}

impl FillCursor {
    pub fn new(last_ts: TimeMs, last_seq: i64) -> Self {
        FillCursor { last_ts, last_seq }
    }

    pub fn of(fill: &Fill) -> Self {
        FillCursor::new(fill.ts, fill.seq)
    }
}
