//! Outbound events produced by the engine.
//!
//! Events leave the engine through a tokio broadcast channel.  Delivery is
//! fire-and-forget and at-most-once per subscriber: the real-time fan-out,
//! notification and catalog collaborators each hold their own receiver and
//! tolerate lag.  Nothing inside the engine ever depends on an event being
//! observed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use veiling_common::{AuctionId, OrderId, Price, ProductId, UserId};

use crate::cascade::OrderStatus;
use crate::lifecycle::AuctionStatus;

/// Everything the engine tells the outside world.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MarketEvent {
    AuctionStarted {
        auction_id: AuctionId,
        seller_id: UserId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    /// High-frequency broadcast after every admitted bid.
    AuctionStateUpdate {
        auction_id: AuctionId,
        status: AuctionStatus,
        current_bid: Option<Price>,
        leader_id: Option<UserId>,
        next_min_bid: Price,
        /// Seconds until the (possibly extended) end time.
        time_left_secs: i64,
    },
    AuctionEnded {
        auction_id: AuctionId,
        final_status: AuctionStatus,
        winner_id: Option<UserId>,
        winning_bid: Option<Price>,
        eligible_bidders: Vec<UserId>,
    },
    Outbid {
        auction_id: AuctionId,
        outbid_user_id: UserId,
        new_current_bid: Price,
        new_leader_id: UserId,
    },
    OrderCreated {
        order_id: OrderId,
        auction_id: AuctionId,
        winner_id: UserId,
        amount_due: Price,
        deadline: DateTime<Utc>,
    },
    OrderCascadeAdvanced {
        order_id: OrderId,
        new_offeree: UserId,
        attempt: u32,
        deadline: DateTime<Utc>,
    },
    OrderFinalized {
        order_id: OrderId,
        status: OrderStatus,
    },
    /// Seller chose to reopen: the catalog-event path creates the successor
    /// auction for the same product.
    RelistRequested {
        order_id: OrderId,
        product_id: ProductId,
        seller_id: UserId,
    },
}

/// Thin wrapper around the broadcast sender so emitting stays one call.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<MarketEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to engine events (fire-and-forget).
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    /// Best-effort emit.  A send error only means nobody is listening right
    /// now, which is fine for a broadcast-oriented stream.
    pub fn emit(&self, event: MarketEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped: no active subscribers");
        }
    }
}
