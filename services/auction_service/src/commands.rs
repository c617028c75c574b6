//! Deferred commands delivered back to the engine by the scheduler.
//!
//! Delivery is at-least-once and unordered across command types; every
//! handler therefore guards on current state (and, for payment timeouts, on
//! the attempt number the command was armed for) instead of assuming the
//! command is still relevant when it arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veiling_common::{AuctionId, OrderId};

/// A time-triggered instruction for the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Flip a scheduled auction to active at its start time.
    StartAuction { auction_id: AuctionId },

    /// Resolve an active auction at its end time.  Superseded by an
    /// anti-snipe extension: the handler re-checks `end_time` on delivery.
    EndAuction { auction_id: AuctionId },

    /// Check whether the offered bidder paid before `deadline`.  `attempt`
    /// pins the command to the cascade step it was armed for.
    CheckPaymentTimeout {
        order_id: OrderId,
        deadline: DateTime<Utc>,
        attempt: u32,
    },
}

impl EngineCommand {
    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCommand::StartAuction { .. } => "start_auction",
            EngineCommand::EndAuction { .. } => "end_auction",
            EngineCommand::CheckPaymentTimeout { .. } => "check_payment_timeout",
        }
    }
}
