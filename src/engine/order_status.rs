//! Derive an order's local status from quantities and the broker's status string.

use crate::domain::OrderStatus;

fn normalize(broker_status: Option<&str>) -> String {
    broker_status
        .map(|s| s.trim().to_ascii_uppercase())
        .unwrap_or_default()
}

fn is_cancelled(status: &str) -> bool {
    matches!(status, "CANCELLED" | "CANCELED")
}

/// Status ladder:
/// - FILLED once something filled and filled covers qty
/// - PARTIAL while partly filled and still open
/// - broker CANCELLED / REJECTED / ERROR while nothing filled, else SUBMITTED
/// - CANCELLED_PARTIAL when partly filled then cancelled
/// - UNKNOWN otherwise
pub fn derive_order_status(
    qty: i64,
    open_qty: i64,
    filled_qty: i64,
    broker_status: Option<&str>,
) -> OrderStatus {
    let broker = normalize(broker_status);

    if filled_qty > 0 && filled_qty >= qty {
        return OrderStatus::Filled;
    }
    if filled_qty > 0 && open_qty > 0 {
        return OrderStatus::Partial;
    }
    if filled_qty == 0 {
        return match broker.as_str() {
            s if is_cancelled(s) => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            "ERROR" => OrderStatus::Error,
            _ => OrderStatus::Submitted,
        };
    }
    if is_cancelled(&broker) {
        return OrderStatus::CancelledPartial;
    }
    OrderStatus::Unknown
}
