//! Centralised error handling for the auction engine.
//!
//! Variants map one-to-one onto the engine's failure categories: commands
//! that reference a missing entity, commands arriving in a state that cannot
//! accept them, bid validation failures, and authorization failures.  The
//! dispatcher decides per call-site whether a variant is benign (redelivered
//! start/end command) or must be surfaced to the caller.

use thiserror::Error;
use veiling_common::{AuctionId, OrderId};

use crate::lifecycle::AuctionStatus;
use crate::cascade::OrderStatus;

/// A convenient `Result` alias tied to [`EngineError`].
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Top-level engine error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Referenced auction does not exist.
    #[error("auction {0} not found")]
    AuctionNotFound(AuctionId),

    /// Referenced order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Command incompatible with the auction's current state.  Redeliverable
    /// commands treat this as an idempotent no-op; user actions surface it.
    #[error("invalid transition: auction is {current:?}")]
    InvalidAuctionState { current: AuctionStatus },

    /// Command incompatible with the order's current state.
    #[error("invalid transition: order is {current:?}")]
    InvalidOrderState { current: OrderStatus },

    /// Bid or request failed a domain validation rule.  Auction state is
    /// untouched; the reason is surfaced to the caller verbatim.
    #[error("rejected: {0}")]
    Validation(ValidationFailure),

    /// Caller is not allowed to perform the action (banned bidder, a seller
    /// acting on someone else's auction or order).
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Storage-layer failure.  Deferred-command handlers let this bubble so
    /// redelivery retries the command.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Specific reasons a bid or seller request is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("bid below the required minimum increment")]
    BelowMinimumIncrement,

    #[error("bidder already holds the leading bid")]
    SelfOutbid,

    #[error("max bid must strictly raise the existing max")]
    MaxBidNotRaised,

    #[error("max bid does not beat the current visible price")]
    MaxBidBelowVisiblePrice,

    #[error("bid type does not match the auction type")]
    WrongBidType,

    #[error("auction already has bids and can no longer be cancelled")]
    BidsAlreadyPlaced,

    #[error("hammer-down is only available on timed auctions")]
    NotATimedAuction,

    #[error("no next bidder is available to offer the sale to")]
    EligibleListExhausted,

    #[error("auction end time must lie after its start time")]
    InvertedSchedule,
}

impl From<ValidationFailure> for EngineError {
    fn from(v: ValidationFailure) -> Self {
        EngineError::Validation(v)
    }
}

impl EngineError {
    /// Whether a deferred command failing with this error may be silently
    /// absorbed under at-least-once redelivery.
    pub fn is_benign_redelivery(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidAuctionState { .. } | EngineError::InvalidOrderState { .. }
        )
    }
}
