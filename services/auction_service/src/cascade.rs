//! Order payment-fallback cascade.
//!
//! A sold auction produces exactly one order.  The sale is offered to the
//! winner first; when the payment window lapses (or the buyer backs out)
//! the offer moves to the next eligible bidder, and once the list is
//! exhausted the seller decides how to terminate.  Every payment-timeout
//! command carries the attempt number it was armed for, so a duplicate or
//! delayed delivery can never rewind a cascade that already advanced.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use veiling_common::{AuctionId, OrderId, ProductId, UserId};

use crate::commands::EngineCommand;
use crate::config::OrderSection;
use crate::error::{EngineError, Result, ValidationFailure};
use crate::events::{EventBus, MarketEvent};
use crate::lifecycle::{EligibleBidder, SoldOutcome};
use crate::scheduler::CommandScheduler;

/* -------------------------------------------------------------------------- */
/*                                   Domain                                   */
/* -------------------------------------------------------------------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingPayment,
    Paid,
    AwaitingSellerDecision,
    Reopened,
    Cancelled,
}

/// How the seller terminates an exhausted cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SellerDecision {
    OfferToNextBidder,
    ReopenAuction,
    CancelSale,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub auction_id: AuctionId,
    pub product_id: ProductId,
    pub seller_id: UserId,
    /// Winner first, then runners-up, price-descending.  Never mutated.
    pub eligible: Vec<EligibleBidder>,
    /// Pointer into `eligible`; only ever advances.
    pub current_offer_index: usize,
    /// Which payment window is currently armed; guards stale timeouts.
    pub payment_attempt: u32,
    pub payment_deadline: DateTime<Utc>,
    pub status: OrderStatus,
    /// Bumped on every write; the store rejects stale writes.
    pub version: u64,
}

impl Order {
    /// The bidder currently offered the sale, if any.
    pub fn current_offeree(&self) -> Option<EligibleBidder> {
        self.eligible.get(self.current_offer_index).copied()
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Store                                   */
/* -------------------------------------------------------------------------- */

/// Storage abstraction for orders.  `status` and `current_offer_index`
/// always travel in the same write, so readers never observe one advanced
/// without the other.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    /// Persist an updated row; `order.version` must be exactly one above the
    /// stored version.
    async fn update(&self, order: &Order) -> Result<()>;
}

/// In-memory, thread-safe store.  Meant for tests and local development.
#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(EngineError::Storage(format!(
                "order {} already exists",
                order.id
            )));
        }
        let _ = orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn update(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or(EngineError::OrderNotFound(order.id))?;
        if order.version != stored.version + 1 {
            return Err(EngineError::Storage(format!(
                "stale write for order {}: version {} on top of {}",
                order.id, order.version, stored.version
            )));
        }
        *stored = order.clone();
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/*                               CascadeManager                               */
/* -------------------------------------------------------------------------- */

// Slots are kept for the process lifetime, one pointer-sized entry per order
// ever seen; eviction would need a waiter count and settled orders still take
// late redeliveries, so the table is left append-only.
type LockTable = Mutex<HashMap<OrderId, Arc<Mutex<()>>>>;

/// Owns every order transition.  Auction entities are never touched from
/// here; the only input from the auction side is the [`SoldOutcome`].
#[derive(Clone)]
pub struct CascadeManager<S: OrderStore> {
    store: Arc<S>,
    scheduler: Arc<dyn CommandScheduler>,
    bus: EventBus,
    rules: OrderSection,
    locks: Arc<LockTable>,
}

impl<S: OrderStore> CascadeManager<S> {
    pub fn new(
        store: Arc<S>,
        scheduler: Arc<dyn CommandScheduler>,
        bus: EventBus,
        rules: OrderSection,
    ) -> Self {
        Self {
            store,
            scheduler,
            bus,
            rules,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_order(&self, id: OrderId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.locks.lock().await;
            table.entry(id).or_default().clone()
        };
        slot.lock_owned().await
    }

    async fn load(&self, id: OrderId) -> Result<Order> {
        self.store
            .get(id)
            .await?
            .ok_or(EngineError::OrderNotFound(id))
    }

    /// Current state of one order, for reads outside the engine.
    pub async fn order(&self, id: OrderId) -> Result<Order> {
        self.load(id).await
    }

    fn payment_window(&self) -> Duration {
        Duration::from_std(self.rules.payment_window).unwrap_or_else(|_| Duration::hours(72))
    }

    /* ------------------------------- Opening ------------------------------- */

    /// React to a sold auction: create the order against the winner and arm
    /// the first payment window.
    pub async fn open_order(&self, outcome: SoldOutcome) -> Result<OrderId> {
        let winner = *outcome
            .eligible
            .first()
            .ok_or(ValidationFailure::EligibleListExhausted)?;
        let deadline = Utc::now() + self.payment_window();

        let order = Order {
            id: OrderId::new(),
            auction_id: outcome.auction_id,
            product_id: outcome.product_id,
            seller_id: outcome.seller_id,
            eligible: outcome.eligible,
            current_offer_index: 0,
            payment_attempt: 1,
            payment_deadline: deadline,
            status: OrderStatus::AwaitingPayment,
            version: 0,
        };
        let order_id = order.id;
        self.store.insert(order).await?;
        self.scheduler
            .schedule(
                deadline,
                EngineCommand::CheckPaymentTimeout {
                    order_id,
                    deadline,
                    attempt: 1,
                },
            )
            .await;
        self.bus.emit(MarketEvent::OrderCreated {
            order_id,
            auction_id: outcome.auction_id,
            winner_id: winner.bidder_id,
            amount_due: winner.amount,
            deadline,
        });
        tracing::info!(order_id = %order_id, auction_id = %outcome.auction_id, "order created");
        Ok(order_id)
    }

    /* --------------------------- Payment events ---------------------------- */

    /// Payment-provider confirmation: the cascade halts permanently.  Any
    /// armed timeout dies against the status guard.
    pub async fn handle_payment_succeeded(&self, order_id: OrderId) -> Result<()> {
        let _guard = self.lock_order(order_id).await;
        let mut order = self.load(order_id).await?;

        if order.status != OrderStatus::AwaitingPayment {
            tracing::debug!(order_id = %order_id, status = ?order.status, "stale payment confirmation ignored");
            return Err(EngineError::InvalidOrderState {
                current: order.status,
            });
        }

        order.status = OrderStatus::Paid;
        order.version += 1;
        self.store.update(&order).await?;
        self.bus.emit(MarketEvent::OrderFinalized {
            order_id,
            status: OrderStatus::Paid,
        });
        tracing::info!(order_id = %order_id, attempt = order.payment_attempt, "order paid");
        Ok(())
    }

    /// A failed charge does not advance the cascade: the buyer may retry
    /// until the deadline lapses.
    pub async fn handle_payment_failed(&self, order_id: OrderId) -> Result<()> {
        let order = self.load(order_id).await?;
        tracing::info!(
            order_id = %order_id,
            attempt = order.payment_attempt,
            deadline = %order.payment_deadline,
            "payment attempt failed, window stays open"
        );
        Ok(())
    }

    /// Deferred payment-timeout command.  Discarded whenever the order moved
    /// on: wrong status, or an attempt number that is no longer current.
    pub async fn handle_timeout(&self, order_id: OrderId, attempt: u32) -> Result<()> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;

        if order.status != OrderStatus::AwaitingPayment || order.payment_attempt != attempt {
            tracing::debug!(
                order_id = %order_id,
                armed_for = attempt,
                current = order.payment_attempt,
                status = ?order.status,
                "stale payment timeout discarded"
            );
            return Ok(());
        }

        tracing::info!(order_id = %order_id, attempt, "payment window lapsed");
        self.advance_locked(order).await
    }

    /// The offered buyer explicitly backs out of paying.
    pub async fn buyer_cancel(&self, order_id: OrderId, buyer_id: UserId) -> Result<()> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;

        if order.status != OrderStatus::AwaitingPayment {
            return Err(EngineError::InvalidOrderState {
                current: order.status,
            });
        }
        if order.current_offeree().map(|e| e.bidder_id) != Some(buyer_id) {
            return Err(EngineError::Forbidden(
                "only the currently offered buyer may cancel",
            ));
        }

        tracing::info!(order_id = %order_id, attempt = order.payment_attempt, "buyer cancelled payment attempt");
        self.advance_locked(order).await
    }

    /* --------------------------- Seller decision ---------------------------- */

    pub async fn handle_seller_decision(
        &self,
        order_id: OrderId,
        seller_id: UserId,
        decision: SellerDecision,
    ) -> Result<()> {
        let _guard = self.lock_order(order_id).await;
        let mut order = self.load(order_id).await?;

        if order.seller_id != seller_id {
            return Err(EngineError::Forbidden("only the seller may decide"));
        }
        if order.status != OrderStatus::AwaitingSellerDecision {
            return Err(EngineError::InvalidOrderState {
                current: order.status,
            });
        }

        match decision {
            SellerDecision::OfferToNextBidder => {
                // Defensive re-check: the pointer normally sits past the end
                // of the list by the time the seller is asked.
                if order.current_offeree().is_none() {
                    return Err(ValidationFailure::EligibleListExhausted.into());
                }
                self.rearm_offer(order).await
            }
            SellerDecision::ReopenAuction => {
                order.status = OrderStatus::Reopened;
                order.version += 1;
                self.store.update(&order).await?;
                self.bus.emit(MarketEvent::RelistRequested {
                    order_id,
                    product_id: order.product_id,
                    seller_id: order.seller_id,
                });
                self.bus.emit(MarketEvent::OrderFinalized {
                    order_id,
                    status: OrderStatus::Reopened,
                });
                tracing::info!(order_id = %order_id, "sale reopened for relisting");
                Ok(())
            }
            SellerDecision::CancelSale => {
                order.status = OrderStatus::Cancelled;
                order.version += 1;
                self.store.update(&order).await?;
                self.bus.emit(MarketEvent::OrderFinalized {
                    order_id,
                    status: OrderStatus::Cancelled,
                });
                tracing::info!(order_id = %order_id, "sale cancelled by seller");
                Ok(())
            }
        }
    }

    /* ------------------------------ Internals ------------------------------ */

    /// Move the offer pointer forward.  Either the next eligible bidder gets
    /// a fresh payment window, or the seller takes over.
    async fn advance_locked(&self, mut order: Order) -> Result<()> {
        order.current_offer_index += 1;

        if order.current_offeree().is_some() {
            self.rearm_offer(order).await
        } else {
            order.status = OrderStatus::AwaitingSellerDecision;
            order.version += 1;
            self.store.update(&order).await?;
            tracing::info!(order_id = %order.id, "eligible list exhausted, awaiting seller decision");
            Ok(())
        }
    }

    /// Offer the sale to `eligible[current_offer_index]` under a fresh
    /// attempt number, persist index and status together, arm the timeout.
    async fn rearm_offer(&self, mut order: Order) -> Result<()> {
        let offeree = order
            .current_offeree()
            .ok_or(ValidationFailure::EligibleListExhausted)?;
        let deadline = Utc::now() + self.payment_window();

        order.status = OrderStatus::AwaitingPayment;
        order.payment_attempt += 1;
        order.payment_deadline = deadline;
        order.version += 1;
        self.store.update(&order).await?;

        self.scheduler
            .schedule(
                deadline,
                EngineCommand::CheckPaymentTimeout {
                    order_id: order.id,
                    deadline,
                    attempt: order.payment_attempt,
                },
            )
            .await;
        self.bus.emit(MarketEvent::OrderCascadeAdvanced {
            order_id: order.id,
            new_offeree: offeree.bidder_id,
            attempt: order.payment_attempt,
            deadline,
        });
        tracing::info!(
            order_id = %order.id,
            offeree = %offeree.bidder_id,
            attempt = order.payment_attempt,
            "sale offered to next bidder"
        );
        Ok(())
    }
}
