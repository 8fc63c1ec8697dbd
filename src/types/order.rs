use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Pair, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    StopLoss,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
            OrderKind::StopLoss => "STOP_LOSS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired)
    }
}

/// An order request as submitted to `ExchangeAdapter::place_order`. The
/// `client_order_id` doubles as the de-dup key the adapter checks against its
/// last-N-submitted set before sending anything over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub pair: Pair,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub post_only: bool,
}

impl OrderRequest {
    pub fn market(pair: Pair, side: Side, quantity: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            pair,
            side,
            kind: OrderKind::Market,
            quantity,
            price: None,
            stop_price: None,
            post_only: false,
        }
    }

    pub fn limit(pair: Pair, side: Side, quantity: Decimal, price: Decimal, post_only: bool) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            pair,
            side,
            kind: OrderKind::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            post_only,
        }
    }

    pub fn stop_loss(pair: Pair, side: Side, quantity: Decimal, stop_price: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            pair,
            side,
            kind: OrderKind::StopLoss,
            quantity,
            price: None,
            stop_price: Some(stop_price),
            post_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub pair: Pair,
    pub side: Side,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Option<Decimal>,
    pub average_fill_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: &OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            client_order_id: request.client_order_id.clone(),
            exchange_order_id: None,
            pair: request.pair.clone(),
            side: request.side,
            kind: request.kind,
            status: OrderStatus::Pending,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            price: request.price,
            average_fill_price: None,
            stop_price: request.stop_price,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn fill_percentage(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            (self.filled_quantity / self.quantity) * Decimal::from(100)
        }
    }
}

/// Exchange-native OCO (one-cancels-other) request used to maintain the
/// live-mode stop-loss/take-profit pair with a single exchange-side object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcoOrderRequest {
    pub list_client_order_id: String,
    pub pair: Pair,
    pub side: Side,
    pub quantity: Decimal,
    pub take_profit_price: Decimal,
    pub stop_price: Decimal,
    pub stop_limit_price: Decimal,
}

impl OcoOrderRequest {
    pub fn new(pair: Pair, side: Side, quantity: Decimal, take_profit_price: Decimal, stop_price: Decimal) -> Self {
        // Stop-limit set 0.1% through the stop trigger so the limit leg still
        // fills during a fast move.
        let stop_limit_price = stop_price * (Decimal::ONE - Decimal::new(1, 3));
        Self {
            list_client_order_id: Uuid::new_v4().to_string(),
            pair,
            side,
            quantity,
            take_profit_price,
            stop_price,
            stop_limit_price,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcoOrderResult {
    pub list_order_id: String,
    pub list_client_order_id: String,
}
