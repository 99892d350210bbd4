//! Broker interface
//!
//! The trade manager talks to exactly one `Broker`. `PaperBroker` accepts every
//! order and fills entries immediately; live transports implement the same
//! trait outside this crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::types::OrderRequest;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("unknown order id {0}")]
    UnknownOrder(String),
    #[error("broker transport error: {0}")]
    Transport(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait Broker: Send {
    /// Submit an order, returning the broker order id
    fn place_order(&mut self, order: &OrderRequest) -> Result<String, BrokerError>;

    fn cancel_order(&mut self, order_id: &str) -> Result<(), BrokerError>;

    /// True when entry fills are synthesized locally instead of arriving on
    /// the order stream
    fn simulates_fills(&self) -> bool;
}

/// Record of a paper order and whether it was cancelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperOrder {
    pub id: String,
    pub request: OrderRequest,
    pub cancelled: bool,
}

/// Simulated broker for replay and backtests
#[derive(Debug, Default)]
pub struct PaperBroker {
    orders: Vec<PaperOrder>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> &[PaperOrder] {
        &self.orders
    }
}

impl Broker for PaperBroker {
    fn place_order(&mut self, order: &OrderRequest) -> Result<String, BrokerError> {
        let id = format!("paper-{}", Uuid::new_v4());
        debug!(id = %id, payload = %order.payload(), "Paper order placed");
        self.orders.push(PaperOrder {
            id: id.clone(),
            request: order.clone(),
            cancelled: false,
        });
        Ok(id)
    }

    fn cancel_order(&mut self, order_id: &str) -> Result<(), BrokerError> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(order_id.to_string()))?;
        order.cancelled = true;
        Ok(())
    }

    fn simulates_fills(&self) -> bool {
        true
    }
}
