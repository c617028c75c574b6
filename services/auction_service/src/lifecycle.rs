//! Auction lifecycle management.
//!
//! Owns the auction state machine (scheduled → active → terminal) and the
//! two bid-admission paths: direct ascending bids for live auctions and
//! proxy-max bids for timed auctions.  Every mutation of one auction runs
//! under that auction's own async lock, so bids and commands targeting the
//! same auction apply in strict arrival order while different auctions
//! proceed fully in parallel.  Collaborator I/O (ban checks, catalog
//! snapshots) is resolved before the critical section.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use veiling_common::{AuctionId, Price, ProductId, UserId};

use crate::collaborators::{BanRegistry, ProductCatalog, ProductSnapshot};
use crate::commands::EngineCommand;
use crate::config::{AuctionSection, BanPolicy};
use crate::error::{EngineError, Result, ValidationFailure};
use crate::events::{EventBus, MarketEvent};
use crate::ledger::{Bid, BidLedger};
use crate::proxy::ProxyBook;
use crate::scheduler::CommandScheduler;

/* -------------------------------------------------------------------------- */
/*                                   Domain                                   */
/* -------------------------------------------------------------------------- */

/// Live auctions run on a fast clock with open ascending bids; timed
/// auctions run for days on sealed proxy maxima.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionKind {
    Live,
    Timed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Sold,
    ReserveNotMet,
    Cancelled,
    EndedNoBids,
}

impl AuctionStatus {
    /// Terminal states accept no further bids or transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuctionStatus::Sold
                | AuctionStatus::ReserveNotMet
                | AuctionStatus::Cancelled
                | AuctionStatus::EndedNoBids
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub kind: AuctionKind,
    pub seller_id: UserId,
    /// Fetched once at creation, never re-fetched.
    pub product: ProductSnapshot,
    pub status: AuctionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_price: Price,
    /// `None` means no floor.
    pub reserve_price: Option<Price>,
    pub current_bid: Option<Price>,
    pub highest_bidder_id: Option<UserId>,
    /// Bumped on every write; the store rejects stale writes.
    pub version: u64,
}

/// Parameters of the catalog "item ready to auction" event.
#[derive(Clone, Debug)]
pub struct CreateAuction {
    pub product_id: ProductId,
    pub seller_id: UserId,
    pub kind: AuctionKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_price: Price,
    pub reserve_price: Option<Price>,
}

/// One entry of the ranked eligible-bidder list: who, and at what amount the
/// sale is offered to them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibleBidder {
    pub bidder_id: UserId,
    pub amount: Price,
}

/// Everything the order cascade needs from a sold auction.
#[derive(Clone, Debug)]
pub struct SoldOutcome {
    pub auction_id: AuctionId,
    pub seller_id: UserId,
    pub product_id: ProductId,
    /// Winner first, then up to two runners-up, price-descending.
    pub eligible: Vec<EligibleBidder>,
}

/* -------------------------------------------------------------------------- */
/*                                    Store                                   */
/* -------------------------------------------------------------------------- */

/// Storage abstraction for auctions and their bid history.  The store
/// enforces the persistence invariants: monotonic versions on auction rows,
/// append-only bid history, one proxy row per bidder.
#[async_trait]
pub trait AuctionStore: Send + Sync + 'static {
    async fn insert(&self, auction: Auction) -> Result<()>;
    async fn get(&self, id: AuctionId) -> Result<Option<Auction>>;
    /// Persist an updated row; `auction.version` must be exactly one above
    /// the stored version.
    async fn update(&self, auction: &Auction) -> Result<()>;
    async fn append_bid(
        &self,
        id: AuctionId,
        bidder_id: UserId,
        amount: Price,
        placed_at: DateTime<Utc>,
    ) -> Result<Bid>;
    async fn bids(&self, id: AuctionId) -> Result<BidLedger>;
    async fn proxy_book(&self, id: AuctionId) -> Result<ProxyBook>;
    async fn put_proxy_book(&self, id: AuctionId, book: ProxyBook) -> Result<()>;
}

#[derive(Debug)]
struct AuctionRecord {
    auction: Auction,
    ledger: BidLedger,
    proxies: ProxyBook,
}

/// In-memory, thread-safe store.  Meant for tests and local development.
#[derive(Clone, Default)]
pub struct MemoryAuctionStore {
    records: Arc<RwLock<HashMap<AuctionId, AuctionRecord>>>,
}

#[async_trait]
impl AuctionStore for MemoryAuctionStore {
    async fn insert(&self, auction: Auction) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&auction.id) {
            return Err(EngineError::Storage(format!(
                "auction {} already exists",
                auction.id
            )));
        }
        let _ = records.insert(
            auction.id,
            AuctionRecord {
                auction,
                ledger: BidLedger::default(),
                proxies: ProxyBook::default(),
            },
        );
        Ok(())
    }

    async fn get(&self, id: AuctionId) -> Result<Option<Auction>> {
        Ok(self.records.read().await.get(&id).map(|r| r.auction.clone()))
    }

    async fn update(&self, auction: &Auction) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&auction.id)
            .ok_or(EngineError::AuctionNotFound(auction.id))?;
        if auction.version != record.auction.version + 1 {
            return Err(EngineError::Storage(format!(
                "stale write for auction {}: version {} on top of {}",
                auction.id, auction.version, record.auction.version
            )));
        }
        record.auction = auction.clone();
        Ok(())
    }

    async fn append_bid(
        &self,
        id: AuctionId,
        bidder_id: UserId,
        amount: Price,
        placed_at: DateTime<Utc>,
    ) -> Result<Bid> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(EngineError::AuctionNotFound(id))?;
        Ok(record.ledger.append(bidder_id, amount, placed_at).clone())
    }

    async fn bids(&self, id: AuctionId) -> Result<BidLedger> {
        let records = self.records.read().await;
        let record = records.get(&id).ok_or(EngineError::AuctionNotFound(id))?;
        Ok(record.ledger.clone())
    }

    async fn proxy_book(&self, id: AuctionId) -> Result<ProxyBook> {
        let records = self.records.read().await;
        let record = records.get(&id).ok_or(EngineError::AuctionNotFound(id))?;
        Ok(record.proxies.clone())
    }

    async fn put_proxy_book(&self, id: AuctionId, book: ProxyBook) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(EngineError::AuctionNotFound(id))?;
        record.proxies = book;
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/*                              LifecycleManager                              */
/* -------------------------------------------------------------------------- */

// Slots are kept for the process lifetime, one pointer-sized entry per
// auction ever seen; eviction would need a waiter count and terminal auctions
// still take late command redeliveries, so the table is left append-only.
type LockTable = Mutex<HashMap<AuctionId, Arc<Mutex<()>>>>;

/// Owns every auction state transition and both bid-admission paths.
#[derive(Clone)]
pub struct LifecycleManager<S: AuctionStore> {
    store: Arc<S>,
    bans: Arc<dyn BanRegistry>,
    catalog: Arc<dyn ProductCatalog>,
    scheduler: Arc<dyn CommandScheduler>,
    bus: EventBus,
    rules: AuctionSection,
    locks: Arc<LockTable>,
}

impl<S: AuctionStore> LifecycleManager<S> {
    pub fn new(
        store: Arc<S>,
        bans: Arc<dyn BanRegistry>,
        catalog: Arc<dyn ProductCatalog>,
        scheduler: Arc<dyn CommandScheduler>,
        bus: EventBus,
        rules: AuctionSection,
    ) -> Self {
        Self {
            store,
            bans,
            catalog,
            scheduler,
            bus,
            rules,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Serialize all work on one auction; different auctions run in parallel.
    async fn lock_auction(&self, id: AuctionId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.locks.lock().await;
            table.entry(id).or_default().clone()
        };
        slot.lock_owned().await
    }

    async fn load(&self, id: AuctionId) -> Result<Auction> {
        self.store
            .get(id)
            .await?
            .ok_or(EngineError::AuctionNotFound(id))
    }

    /// Current state of one auction, for reads outside the engine.
    pub async fn auction(&self, id: AuctionId) -> Result<Auction> {
        self.load(id).await
    }

    fn increment_at(&self, price: Price) -> Price {
        self.rules.increment_at(price)
    }

    fn next_min_bid(&self, auction: &Auction) -> Price {
        match auction.current_bid {
            Some(current) => current + self.increment_at(current),
            None => auction.start_price,
        }
    }

    fn emit_state_update(&self, auction: &Auction, now: DateTime<Utc>) {
        self.bus.emit(MarketEvent::AuctionStateUpdate {
            auction_id: auction.id,
            status: auction.status,
            current_bid: auction.current_bid,
            leader_id: auction.highest_bidder_id,
            next_min_bid: self.next_min_bid(auction),
            time_left_secs: (auction.end_time - now).num_seconds(),
        });
    }

    /* ------------------------------ Creation ------------------------------ */

    /// Handle a catalog "item ready to auction" event: snapshot the product,
    /// persist the auction in `Scheduled` and arm its start command.
    pub async fn create_auction(&self, params: CreateAuction) -> Result<AuctionId> {
        if params.end_time <= params.start_time {
            return Err(ValidationFailure::InvertedSchedule.into());
        }
        let product = self.catalog.snapshot(params.product_id).await?;

        let auction = Auction {
            id: AuctionId::new(),
            kind: params.kind,
            seller_id: params.seller_id,
            product,
            status: AuctionStatus::Scheduled,
            start_time: params.start_time,
            end_time: params.end_time,
            start_price: params.start_price,
            reserve_price: params.reserve_price,
            current_bid: None,
            highest_bidder_id: None,
            version: 0,
        };
        let id = auction.id;
        self.store.insert(auction).await?;
        self.scheduler
            .schedule(params.start_time, EngineCommand::StartAuction { auction_id: id })
            .await;
        tracing::info!(auction_id = %id, kind = ?params.kind, "auction scheduled");
        Ok(id)
    }

    /* ---------------------------- Start / End ----------------------------- */

    /// Deferred start command.  Idempotent: a redelivery against an active or
    /// terminal auction is absorbed by the caller via
    /// [`EngineError::is_benign_redelivery`].
    pub async fn handle_start(&self, auction_id: AuctionId) -> Result<()> {
        let _guard = self.lock_auction(auction_id).await;
        let mut auction = self.load(auction_id).await?;

        if auction.status != AuctionStatus::Scheduled {
            tracing::debug!(auction_id = %auction_id, status = ?auction.status, "duplicate start ignored");
            return Err(EngineError::InvalidAuctionState {
                current: auction.status,
            });
        }

        auction.status = AuctionStatus::Active;
        auction.version += 1;
        self.store.update(&auction).await?;
        self.scheduler
            .schedule(auction.end_time, EngineCommand::EndAuction { auction_id })
            .await;
        self.bus.emit(MarketEvent::AuctionStarted {
            auction_id,
            seller_id: auction.seller_id,
            start_time: auction.start_time,
            end_time: auction.end_time,
        });
        tracing::info!(auction_id = %auction_id, end_time = %auction.end_time, "auction active");
        Ok(())
    }

    /// Deferred end command.  A delivery superseded by an anti-snipe
    /// extension (the clock says the auction is not over yet) is a no-op;
    /// the extension armed its own later command.
    pub async fn handle_end(&self, auction_id: AuctionId) -> Result<Option<SoldOutcome>> {
        // Ban statuses are I/O and must not resolve under the auction lock;
        // fetch them up front from a pre-lock snapshot of the contenders.
        let voided = self.voided_bidders(auction_id).await?;

        let _guard = self.lock_auction(auction_id).await;
        let auction = self.load(auction_id).await?;

        if auction.status != AuctionStatus::Active {
            tracing::debug!(auction_id = %auction_id, status = ?auction.status, "duplicate end ignored");
            return Err(EngineError::InvalidAuctionState {
                current: auction.status,
            });
        }
        if Utc::now() < auction.end_time {
            tracing::debug!(auction_id = %auction_id, "end command superseded by extension");
            return Ok(None);
        }

        self.resolve_locked(auction, &voided).await
    }

    /// Seller-initiated early close for timed auctions; same resolution as a
    /// regular end, immediately.
    pub async fn hammer_down(
        &self,
        auction_id: AuctionId,
        seller_id: UserId,
    ) -> Result<Option<SoldOutcome>> {
        let voided = self.voided_bidders(auction_id).await?;

        let _guard = self.lock_auction(auction_id).await;
        let auction = self.load(auction_id).await?;

        if auction.seller_id != seller_id {
            return Err(EngineError::Forbidden("only the seller may hammer down"));
        }
        if auction.kind != AuctionKind::Timed {
            return Err(ValidationFailure::NotATimedAuction.into());
        }
        if auction.status != AuctionStatus::Active {
            return Err(EngineError::InvalidAuctionState {
                current: auction.status,
            });
        }

        tracing::info!(auction_id = %auction_id, "hammer down");
        self.resolve_locked(auction, &voided).await
    }

    /// Seller cancellation: only before any bid has been placed.
    pub async fn cancel(&self, auction_id: AuctionId, seller_id: UserId) -> Result<()> {
        let _guard = self.lock_auction(auction_id).await;
        let mut auction = self.load(auction_id).await?;

        if auction.seller_id != seller_id {
            return Err(EngineError::Forbidden("only the seller may cancel"));
        }
        if auction.status.is_terminal() {
            return Err(EngineError::InvalidAuctionState {
                current: auction.status,
            });
        }
        let has_bids = match auction.kind {
            AuctionKind::Live => !self.store.bids(auction_id).await?.is_empty(),
            AuctionKind::Timed => !self.store.proxy_book(auction_id).await?.is_empty(),
        };
        if has_bids {
            return Err(ValidationFailure::BidsAlreadyPlaced.into());
        }

        auction.status = AuctionStatus::Cancelled;
        auction.version += 1;
        self.store.update(&auction).await?;
        self.bus.emit(MarketEvent::AuctionEnded {
            auction_id,
            final_status: AuctionStatus::Cancelled,
            winner_id: None,
            winning_bid: None,
            eligible_bidders: Vec::new(),
        });
        tracing::info!(auction_id = %auction_id, "auction cancelled");
        Ok(())
    }

    /* ---------------------------- Bid admission ---------------------------- */

    /// Direct ascending bid on a live auction.
    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        bidder_id: UserId,
        amount: Price,
    ) -> Result<()> {
        if self.bans.is_banned(bidder_id).await? {
            return Err(EngineError::Forbidden("bidder is banned"));
        }

        let _guard = self.lock_auction(auction_id).await;
        let mut auction = self.load(auction_id).await?;

        if auction.status != AuctionStatus::Active {
            return Err(EngineError::InvalidAuctionState {
                current: auction.status,
            });
        }
        if auction.kind != AuctionKind::Live {
            return Err(ValidationFailure::WrongBidType.into());
        }
        if auction.highest_bidder_id == Some(bidder_id) {
            return Err(ValidationFailure::SelfOutbid.into());
        }
        if amount < self.next_min_bid(&auction) {
            return Err(ValidationFailure::BelowMinimumIncrement.into());
        }

        let now = Utc::now();
        let previous_leader = auction.highest_bidder_id;
        let bid = self.store.append_bid(auction_id, bidder_id, amount, now).await?;
        auction.current_bid = Some(amount);
        auction.highest_bidder_id = Some(bidder_id);
        self.extend_on_snipe(&mut auction, now).await;
        auction.version += 1;
        self.store.update(&auction).await?;

        if let Some(outbid) = previous_leader {
            self.bus.emit(MarketEvent::Outbid {
                auction_id,
                outbid_user_id: outbid,
                new_current_bid: amount,
                new_leader_id: bidder_id,
            });
        }
        self.emit_state_update(&auction, now);
        tracing::debug!(auction_id = %auction_id, amount, seq = bid.seq, "bid admitted");
        Ok(())
    }

    /// Proxy (max) bid on a timed auction; resolution is delegated to the
    /// pure [`ProxyBook`] computation.
    pub async fn place_proxy_bid(
        &self,
        auction_id: AuctionId,
        bidder_id: UserId,
        max_bid: Price,
    ) -> Result<()> {
        if self.bans.is_banned(bidder_id).await? {
            return Err(EngineError::Forbidden("bidder is banned"));
        }

        let _guard = self.lock_auction(auction_id).await;
        let mut auction = self.load(auction_id).await?;

        if auction.status != AuctionStatus::Active {
            return Err(EngineError::InvalidAuctionState {
                current: auction.status,
            });
        }
        if auction.kind != AuctionKind::Timed {
            return Err(ValidationFailure::WrongBidType.into());
        }

        let now = Utc::now();
        let mut book = self.store.proxy_book(auction_id).await?;
        let resolution = book
            .apply(bidder_id, max_bid, now, auction.start_price, |p| {
                self.increment_at(p)
            })
            .map_err(EngineError::Validation)?;
        self.store.put_proxy_book(auction_id, book).await?;

        auction.current_bid = Some(resolution.visible_price);
        auction.highest_bidder_id = Some(resolution.leader_id);
        if self.rules.snipe_guard_timed {
            self.extend_on_snipe(&mut auction, now).await;
        }
        auction.version += 1;
        self.store.update(&auction).await?;

        if let Some(outbid) = resolution.outbid {
            self.bus.emit(MarketEvent::Outbid {
                auction_id,
                outbid_user_id: outbid,
                new_current_bid: resolution.visible_price,
                new_leader_id: resolution.leader_id,
            });
        }
        self.emit_state_update(&auction, now);
        Ok(())
    }

    /* ------------------------------ Internals ------------------------------ */

    /// Push `end_time` out when a bid lands inside the snipe window, and arm
    /// the replacement end command.  The superseded command dies against the
    /// `end_time` guard in [`handle_end`].
    ///
    /// The window only opens *before* `end_time`: a bid racing an overdue
    /// end command must not revive the auction.
    async fn extend_on_snipe(&self, auction: &mut Auction, now: DateTime<Utc>) {
        let window = Duration::from_std(self.rules.snipe_window).unwrap_or_default();
        let extension = Duration::from_std(self.rules.snipe_extension).unwrap_or_default();
        let remaining = auction.end_time - now;
        if remaining > Duration::zero() && remaining <= window {
            auction.end_time += extension;
            self.scheduler
                .schedule(
                    auction.end_time,
                    EngineCommand::EndAuction {
                        auction_id: auction.id,
                    },
                )
                .await;
            tracing::debug!(auction_id = %auction.id, new_end = %auction.end_time, "anti-snipe extension");
        }
    }

    /// Under the `void-standing-bids` policy: which contenders are currently
    /// banned.  Resolved from a pre-lock snapshot so no collaborator I/O
    /// happens inside the critical section.
    async fn voided_bidders(&self, auction_id: AuctionId) -> Result<HashSet<UserId>> {
        let mut voided = HashSet::new();
        if self.rules.ban_policy != BanPolicy::VoidStandingBids {
            return Ok(voided);
        }
        let auction = self.load(auction_id).await?;
        let contenders: Vec<UserId> = match auction.kind {
            AuctionKind::Live => self
                .store
                .bids(auction_id)
                .await?
                .ranked_bidders(usize::MAX)
                .into_iter()
                .map(|(bidder, _)| bidder)
                .collect(),
            AuctionKind::Timed => self
                .store
                .proxy_book(auction_id)
                .await?
                .ranked(usize::MAX)
                .into_iter()
                .map(|b| b.bidder_id)
                .collect(),
        };
        for bidder in contenders {
            if self.bans.is_banned(bidder).await? {
                let _ = voided.insert(bidder);
            }
        }
        Ok(voided)
    }

    /// Resolve an active auction to its terminal outcome.  Caller holds the
    /// auction lock and has verified the auction is `Active`.
    async fn resolve_locked(
        &self,
        mut auction: Auction,
        voided: &HashSet<UserId>,
    ) -> Result<Option<SoldOutcome>> {
        let auction_id = auction.id;
        let mut eligible = self.ranked_eligible(&auction, voided).await?;

        let (final_status, outcome) = match eligible.first().copied() {
            None => (AuctionStatus::EndedNoBids, None),
            Some(winner) => {
                if auction.reserve_price.is_some_and(|r| winner.amount < r) {
                    (AuctionStatus::ReserveNotMet, None)
                } else {
                    eligible.truncate(self.rules.eligible_list_len);
                    (
                        AuctionStatus::Sold,
                        Some(SoldOutcome {
                            auction_id,
                            seller_id: auction.seller_id,
                            product_id: auction.product.product_id,
                            eligible: eligible.clone(),
                        }),
                    )
                }
            }
        };

        auction.status = final_status;
        auction.version += 1;
        self.store.update(&auction).await?;

        let winner = outcome.as_ref().and_then(|o| o.eligible.first().copied());
        self.bus.emit(MarketEvent::AuctionEnded {
            auction_id,
            final_status,
            winner_id: winner.map(|w| w.bidder_id),
            winning_bid: winner.map(|w| w.amount),
            eligible_bidders: outcome
                .as_ref()
                .map(|o| o.eligible.iter().map(|e| e.bidder_id).collect())
                .unwrap_or_default(),
        });
        tracing::info!(auction_id = %auction_id, status = ?final_status, "auction resolved");
        Ok(outcome)
    }

    /// Ranked contender list for resolution, banned bidders dropped when the
    /// policy voids standing bids.  The winner is charged the final visible
    /// price; runners-up are recorded at their own committed amounts.
    async fn ranked_eligible(
        &self,
        auction: &Auction,
        voided: &HashSet<UserId>,
    ) -> Result<Vec<EligibleBidder>> {
        let mut ranked: Vec<EligibleBidder> = match auction.kind {
            AuctionKind::Live => self
                .store
                .bids(auction.id)
                .await?
                .ranked_bidders(usize::MAX)
                .into_iter()
                .map(|(bidder_id, amount)| EligibleBidder { bidder_id, amount })
                .collect(),
            AuctionKind::Timed => {
                let mut book = self.store.proxy_book(auction.id).await?;
                let mut retracted = false;
                for bidder in voided {
                    retracted |= book.retract(*bidder);
                }
                let ranked = book
                    .ranked(usize::MAX)
                    .into_iter()
                    .map(|b| EligibleBidder {
                        bidder_id: b.bidder_id,
                        amount: b.max_bid,
                    })
                    .collect();
                if retracted {
                    self.store.put_proxy_book(auction.id, book).await?;
                }
                ranked
            }
        };
        ranked.retain(|e| !voided.contains(&e.bidder_id));

        // The winner pays the visible price, not their private max.
        if let (Some(first), AuctionKind::Timed) = (ranked.first_mut(), auction.kind) {
            if let Some(visible) = auction.current_bid {
                if auction.highest_bidder_id == Some(first.bidder_id) {
                    first.amount = visible;
                }
            }
        }
        Ok(ranked)
    }
}
