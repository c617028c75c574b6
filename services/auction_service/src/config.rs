//! Configuration for the auction service.
//!
//! All runtime behaviour is tuned through a hierarchical, multi-source
//! configuration backed by the `config` crate.
//!
//! Priority (lowest → highest):
//! 1. Compile-time defaults (`impl Default`).
//! 2. An optional TOML/YAML/JSON file passed at start-up.
//! 3. Environment variables with the `VEILING` prefix.
//!
//!     VEILING__AUCTION__SNIPE_WINDOW=45s   # double underscore = path separator
//!
//! The final, frozen [`ServiceConfig`] is published as a global singleton
//! through [`get()`]; the engine structs also accept an explicit handle so
//! tests never touch the singleton.

use std::{path::Path, sync::Arc, time::Duration};

use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use veiling_common::Price;

static SERVICE_CONFIG: OnceCell<Arc<ServiceConfig>> = OnceCell::new();

/// Convenient alias returned by [`init`].
pub type ConfigHandle = Arc<ServiceConfig>;

/// Initialise the configuration singleton.
///
/// `config_path` is an optional explicit path to a configuration file; when
/// `None` the loader looks for `auction.{toml,yaml,json}` in the working
/// directory.  Calling `init` twice is an error.
pub fn init(config_path: Option<impl AsRef<Path>>) -> Result<ConfigHandle, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path.as_ref().to_path_buf()).required(true));
    } else {
        for ext in ["toml", "yaml", "json"] {
            let file_name = format!("auction.{ext}");
            if Path::new(&file_name).exists() {
                builder = builder.add_source(File::with_name(&file_name).required(false));
                break;
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("VEILING")
            .separator("__")
            .try_parsing(true)
            .list_separator(","),
    );

    let cfg: ServiceConfig = builder.build()?.try_deserialize()?;
    cfg.validate().map_err(ConfigError::Message)?;

    let arc = Arc::new(cfg);
    SERVICE_CONFIG
        .set(arc.clone())
        .map_err(|_| ConfigError::Message("configuration already initialised".into()))?;
    Ok(arc)
}

/// Obtain the frozen [`ServiceConfig`].  Panics if [`init`] was never called.
pub fn get() -> &'static ServiceConfig {
    SERVICE_CONFIG
        .get()
        .expect("configuration accessed before initialisation")
}

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub auction: AuctionSection,
    pub orders: OrderSection,
    pub events: EventSection,
}

impl ServiceConfig {
    /// Validate internal consistency; prefer an error over silently fixing
    /// values at runtime.
    fn validate(&self) -> Result<(), String> {
        if self.auction.increment_tiers.is_empty() {
            return Err("auction.increment_tiers must not be empty".into());
        }
        if self.auction.increment_tiers[0].from_price != 0 {
            return Err("auction.increment_tiers must start at price 0".into());
        }
        if !self
            .auction
            .increment_tiers
            .windows(2)
            .all(|w| w[0].from_price < w[1].from_price)
        {
            return Err("auction.increment_tiers must be strictly ascending".into());
        }
        if self.auction.eligible_list_len == 0 {
            return Err("auction.eligible_list_len must be > 0".into());
        }
        if self.orders.payment_window < Duration::from_secs(60) {
            return Err("orders.payment_window is unrealistically low".into());
        }
        if self.events.bus_capacity == 0 {
            return Err("events.bus_capacity must be > 0".into());
        }
        Ok(())
    }
}

/// Metadata & housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Logical service name – appears in logs.
    pub name: String,
    /// Graceful shutdown timeout.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "veiling-auction".into(),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

/// Policy for bidders that get banned while holding bids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BanPolicy {
    /// Only future bids are blocked; standing bids keep their rank.
    BlockFutureBids,
    /// Standing bids of a banned bidder are dropped from the eligible list
    /// when the auction resolves.
    VoidStandingBids,
}

/// One tier of the bid-increment schedule: at prices of `from_price` and
/// above, a new bid must beat the current price by at least `increment`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IncrementTier {
    pub from_price: Price,
    pub increment: Price,
}

/// Bidding rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionSection {
    /// A live bid landing within this window before `end_time` extends the
    /// auction.
    #[serde(with = "humantime_serde")]
    pub snipe_window: Duration,
    /// How far `end_time` is pushed out by an anti-snipe extension.
    #[serde(with = "humantime_serde")]
    pub snipe_extension: Duration,
    /// Whether timed (proxy-bid) auctions also get the anti-snipe rule.
    pub snipe_guard_timed: bool,
    /// What happens to the standing bids of a banned bidder.
    pub ban_policy: BanPolicy,
    /// Price-tier → minimum-increment schedule, ascending by `from_price`.
    pub increment_tiers: Vec<IncrementTier>,
    /// Winner plus runners-up offered the sale before the seller decides.
    pub eligible_list_len: usize,
}

impl Default for AuctionSection {
    fn default() -> Self {
        Self {
            snipe_window: Duration::from_secs(30),
            snipe_extension: Duration::from_secs(60),
            snipe_guard_timed: false,
            ban_policy: BanPolicy::BlockFutureBids,
            // euro-cents
            increment_tiers: vec![
                IncrementTier { from_price: 0, increment: 50 },
                IncrementTier { from_price: 2_500, increment: 100 },
                IncrementTier { from_price: 10_000, increment: 500 },
                IncrementTier { from_price: 50_000, increment: 1_000 },
                IncrementTier { from_price: 250_000, increment: 5_000 },
            ],
            eligible_list_len: 3,
        }
    }
}

impl AuctionSection {
    /// Minimum increment required on top of `price`.
    pub fn increment_at(&self, price: Price) -> Price {
        self.increment_tiers
            .iter()
            .rev()
            .find(|t| price >= t.from_price)
            .map(|t| t.increment)
            .unwrap_or(1)
    }
}

/// Payment-cascade rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderSection {
    /// How long each offered bidder has to complete payment.
    #[serde(with = "humantime_serde")]
    pub payment_window: Duration,
}

impl Default for OrderSection {
    fn default() -> Self {
        Self {
            payment_window: Duration::from_secs(72 * 3600),
        }
    }
}

/// Outbound event fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSection {
    /// Broadcast channel capacity; slow subscribers lag and drop.
    pub bus_capacity: usize,
}

impl Default for EventSection {
    fn default() -> Self {
        Self { bus_capacity: 1024 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        ServiceConfig::default().validate().unwrap();
    }

    #[test]
    fn increment_schedule_lookup_picks_matching_tier() {
        let auction = AuctionSection::default();
        assert_eq!(auction.increment_at(0), 50);
        assert_eq!(auction.increment_at(2_499), 50);
        assert_eq!(auction.increment_at(2_500), 100);
        assert_eq!(auction.increment_at(1_000_000), 5_000);
    }

    #[test]
    fn unsorted_tiers_are_rejected() {
        let mut cfg = ServiceConfig::default();
        cfg.auction.increment_tiers = vec![
            IncrementTier { from_price: 0, increment: 50 },
            IncrementTier { from_price: 500, increment: 100 },
            IncrementTier { from_price: 500, increment: 200 },
        ];
        assert!(cfg.validate().is_err());
    }
}
