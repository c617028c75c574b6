//! Service wiring: one facade owning both managers plus the dispatcher loop
//! that drains due commands from the scheduler queue.
//!
//! Routing is deliberately thin.  The only cross-manager hop lives here:
//! an `EndAuction` delivery that resolves to a sold outcome is handed
//! straight to the cascade, so the two managers never reference each other.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cascade::{CascadeManager, MemoryOrderStore, OrderStore};
use crate::collaborators::{BanRegistry, ProductCatalog};
use crate::commands::EngineCommand;
use crate::config::ServiceConfig;
use crate::error::EngineError;
use crate::events::EventBus;
use crate::lifecycle::{AuctionStore, LifecycleManager, MemoryAuctionStore};
use crate::scheduler::TimerScheduler;

/// The auction engine as one deployable unit.
#[derive(Clone)]
pub struct MarketService<A: AuctionStore, O: OrderStore> {
    pub auctions: LifecycleManager<A>,
    pub orders: CascadeManager<O>,
    bus: EventBus,
}

impl MarketService<MemoryAuctionStore, MemoryOrderStore> {
    /// Fully in-memory wiring, used by the binary's local mode and by tests.
    /// Returns the service plus the delivery queue for [`spawn_dispatcher`].
    ///
    /// [`spawn_dispatcher`]: MarketService::spawn_dispatcher
    pub fn in_memory(
        config: &ServiceConfig,
        bans: Arc<dyn BanRegistry>,
        catalog: Arc<dyn ProductCatalog>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineCommand>) {
        let (scheduler, queue) = TimerScheduler::channel();
        let scheduler = Arc::new(scheduler);
        let bus = EventBus::new(config.events.bus_capacity);

        let auctions = LifecycleManager::new(
            Arc::new(MemoryAuctionStore::default()),
            bans,
            catalog,
            scheduler.clone(),
            bus.clone(),
            config.auction.clone(),
        );
        let orders = CascadeManager::new(
            Arc::new(MemoryOrderStore::default()),
            scheduler,
            bus.clone(),
            config.orders.clone(),
        );

        (
            Self {
                auctions,
                orders,
                bus,
            },
            queue,
        )
    }
}

impl<A: AuctionStore, O: OrderStore> MarketService<A, O> {
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Apply one due command.  Benign redeliveries and unknown ids are
    /// logged and dropped; anything else is logged as an error and left to
    /// the transport's redelivery.
    pub async fn dispatch(&self, command: EngineCommand) {
        let kind = command.kind();
        let result = match command {
            EngineCommand::StartAuction { auction_id } => {
                self.auctions.handle_start(auction_id).await
            }
            EngineCommand::EndAuction { auction_id } => {
                match self.auctions.handle_end(auction_id).await {
                    Ok(Some(sold)) => self.orders.open_order(sold).await.map(|_| ()),
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            EngineCommand::CheckPaymentTimeout {
                order_id, attempt, ..
            } => self.orders.handle_timeout(order_id, attempt).await,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_benign_redelivery() => {
                tracing::debug!(kind, error = %e, "redelivered command absorbed");
            }
            Err(
                e @ (EngineError::AuctionNotFound(_) | EngineError::OrderNotFound(_)),
            ) => {
                tracing::warn!(kind, error = %e, "command for unknown entity dropped");
            }
            Err(e) => {
                tracing::error!(kind, error = %e, "command handler failed");
            }
        }
    }

    /// Drain the scheduler delivery queue until shutdown is signalled.
    pub fn spawn_dispatcher(
        self,
        mut queue: mpsc::UnboundedReceiver<EngineCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::info!("dispatcher shutting down");
                        break;
                    }
                    command = queue.recv() => match command {
                        Some(command) => self.dispatch(command).await,
                        None => break,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::{Duration, Utc};
    use veiling_common::{ProductId, UserId};

    use super::*;
    use crate::collaborators::{MemoryBanRegistry, MemoryCatalog, ProductSnapshot};
    use crate::config::ServiceConfig;
    use crate::events::MarketEvent;
    use crate::lifecycle::{AuctionKind, CreateAuction};

    /// Timer → queue → dispatcher → lifecycle, with no manual dispatching.
    /// The paused clock auto-advances through both armed commands.
    #[tokio::test(start_paused = true)]
    async fn scheduled_commands_flow_through_the_dispatcher() {
        let catalog = MemoryCatalog::default();
        let (service, queue) = MarketService::in_memory(
            &ServiceConfig::default(),
            Arc::new(MemoryBanRegistry::default()),
            Arc::new(catalog.clone()),
        );
        let mut events = service.event_bus().subscribe();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _dispatcher = service.clone().spawn_dispatcher(queue, shutdown_rx);

        let product_id = ProductId::new();
        catalog
            .put(ProductSnapshot {
                product_id,
                title: "boxed vinyl collection".into(),
                image_url: None,
                categories: vec![],
            })
            .await;

        let id = service
            .auctions
            .create_auction(CreateAuction {
                product_id,
                seller_id: UserId::new(),
                kind: AuctionKind::Live,
                start_time: Utc::now() - Duration::minutes(2),
                end_time: Utc::now() - Duration::seconds(1),
                start_price: 100,
                reserve_price: None,
            })
            .await
            .unwrap();

        // started, then resolved, without any manual dispatch calls
        let mut saw_start = false;
        let mut saw_end = false;
        while !(saw_start && saw_end) {
            let evt = tokio::time::timeout(StdDuration::from_secs(5), events.recv())
                .await
                .expect("engine went quiet before resolving the auction")
                .unwrap();
            match evt {
                MarketEvent::AuctionStarted { auction_id, .. } if auction_id == id => {
                    saw_start = true;
                }
                MarketEvent::AuctionEnded { auction_id, .. } if auction_id == id => {
                    saw_end = true;
                }
                _ => {}
            }
        }
    }
}
