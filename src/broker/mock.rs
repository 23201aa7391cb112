//! In-memory broker for tests and local runs.

use super::{BrokerAdapter, BrokerError, BrokerFill, BrokerHolding, OrderAck, OrderRequest, UnfilledOrder};
use crate::domain::{Decimal, Symbol, TimeMs};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MockState {
    holdings: Vec<BrokerHolding>,
    unfilled: Vec<UnfilledOrder>,
    fills: Vec<BrokerFill>,
    submitted: Vec<(String, OrderRequest)>,
    reject_with: Option<String>,
    holdings_error: Option<BrokerError>,
    next_order: u64,
    next_exec: u64,
}

/// Broker double whose state is mutated by the test driving it.
///
/// Accepted orders are added to the unfilled list; `fill_order` executes
/// against them the way a real broker would.
#[derive(Debug, Default)]
pub struct MockBroker {
    state: Mutex<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_holding(&self, symbol: &str, qty: i64, avg_price: Decimal, current_price: Decimal) {
        let mut state = self.state();
        let symbol = Symbol::new(symbol);
        state.holdings.retain(|h| h.symbol != symbol);
        state.holdings.push(BrokerHolding {
            symbol,
            qty,
            avg_price,
            current_price,
        });
    }

    /// Drop a symbol from the holdings response entirely.
    pub fn remove_holding(&self, symbol: &str) {
        self.state().holdings.retain(|h| h.symbol.as_str() != symbol);
    }

    pub fn set_unfilled(&self, order: UnfilledOrder) {
        let mut state = self.state();
        state.unfilled.retain(|o| o.order_id != order.order_id);
        state.unfilled.push(order);
    }

    /// Make the order disappear from the unfilled list without any fill.
    pub fn drop_unfilled(&self, order_id: &str) {
        self.state().unfilled.retain(|o| o.order_id != order_id);
    }

    pub fn push_fill(&self, fill: BrokerFill) {
        self.state().fills.push(fill);
    }

    /// Execute `qty` of an order at `price`, reporting a fill and shrinking
    /// the order's unfilled entry. Returns the reported fill.
    pub fn fill_order(&self, order_id: &str, qty: i64, price: Decimal, ts: TimeMs) -> BrokerFill {
        let mut state = self.state();
        state.next_exec += 1;
        let fill = BrokerFill {
            order_id: order_id.to_string(),
            exec_id: format!("exec-{}", state.next_exec),
            ts,
            qty,
            price,
            fee: Decimal::zero(),
            tax: Decimal::zero(),
            seq: state.next_exec as i64,
        };
        state.fills.push(fill.clone());

        if let Some(order) = state.unfilled.iter_mut().find(|o| o.order_id == order_id) {
            order.filled_qty += qty;
            order.open_qty = (order.open_qty - qty).max(0);
            order.status = "PARTIAL".to_string();
        }
        state.unfilled.retain(|o| o.open_qty > 0);
        fill
    }

    /// Reject every subsequent submission with `reason`, or accept again with `None`.
    pub fn reject_submissions(&self, reason: Option<&str>) {
        self.state().reject_with = reason.map(str::to_string);
    }

    /// Fail every subsequent holdings request with `error`, or answer again with `None`.
    pub fn fail_holdings(&self, error: Option<BrokerError>) {
        self.state().holdings_error = error;
    }

    /// Accepted submissions with their broker order ids, in order.
    pub fn submitted(&self) -> Vec<(String, OrderRequest)> {
        self.state().submitted.clone()
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let mut state = self.state();
        if let Some(reason) = &state.reject_with {
            return Err(BrokerError::Rejected(reason.clone()));
        }

        state.next_order += 1;
        let order_id = format!("mock-ord-{}", state.next_order);
        state.unfilled.push(UnfilledOrder {
            order_id: order_id.clone(),
            symbol: Some(request.symbol.clone()),
            side: Some(request.side),
            qty: request.qty,
            open_qty: request.qty,
            filled_qty: 0,
            status: "SUBMITTED".to_string(),
        });
        state.submitted.push((order_id.clone(), request.clone()));

        Ok(OrderAck {
            order_id,
            ts: TimeMs::now(),
        })
    }

    async fn get_unfilled_orders(&self, _account_id: &str) -> Result<Vec<UnfilledOrder>, BrokerError> {
        Ok(self.state().unfilled.clone())
    }

    async fn get_fills(&self, _account_id: &str, since: TimeMs) -> Result<Vec<BrokerFill>, BrokerError> {
        let mut fills: Vec<BrokerFill> = self
            .state()
            .fills
            .iter()
            .filter(|f| f.ts >= since)
            .cloned()
            .collect();
        fills.sort_by(|a, b| (a.ts, a.seq).cmp(&(b.ts, b.seq)));
        Ok(fills)
    }

    async fn get_fills_for_order(&self, order_id: &str) -> Result<Vec<BrokerFill>, BrokerError> {
        Ok(self
            .state()
            .fills
            .iter()
            .filter(|f| f.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn get_holdings(&self, _account_id: &str) -> Result<Vec<BrokerHolding>, BrokerError> {
        let state = self.state();
        match &state.holdings_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.holdings.clone()),
        }
    }
}
