//! Veiling auction service.
//!
//! The auction lifecycle and bid-resolution engine combined with the order
//! payment-fallback cascade: live (open ascending) and timed (proxy-max)
//! auctions, time-driven start/end transitions delivered as deferred
//! commands, and the sequential re-offering of a sold item when the winner
//! does not pay.
//!
//! Peripheral concerns — user profiles, the product catalog, notification
//! delivery, the payment provider — stay behind the narrow seams in
//! [`collaborators`] and the payment events consumed by [`cascade`].

#![forbid(unsafe_code)]

pub mod cascade;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod proxy;
pub mod scheduler;
pub mod service;

pub use cascade::{CascadeManager, MemoryOrderStore, Order, OrderStatus, SellerDecision};
pub use error::{EngineError, Result, ValidationFailure};
pub use events::{EventBus, MarketEvent};
pub use lifecycle::{
    Auction, AuctionKind, AuctionStatus, CreateAuction, EligibleBidder, LifecycleManager,
    MemoryAuctionStore, SoldOutcome,
};
pub use service::MarketService;
