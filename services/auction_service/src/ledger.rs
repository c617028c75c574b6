//! Append-only bid ledger for live auctions.
//!
//! One ledger per auction, owned by the auction store.  Entries are
//! immutable facts; the ledger is the source of truth for the current price
//! and the price-ranked distinct-bidder list used by the order cascade.
//! Only the per-auction lock holder appends; snapshots taken by readers are
//! always a consistent prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veiling_common::{Price, UserId};

/// A single admitted live bid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub bidder_id: UserId,
    pub amount: Price,
    pub placed_at: DateTime<Utc>,
    /// Monotonic per-auction admission number; mirrors arrival order at the
    /// auction lock, not submission timestamps.
    pub seq: u64,
}

/// Ordered history of admitted bids for one auction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BidLedger {
    entries: Vec<Bid>,
}

impl BidLedger {
    /// Append a new bid, assigning the next sequence number.
    pub fn append(&mut self, bidder_id: UserId, amount: Price, placed_at: DateTime<Utc>) -> &Bid {
        let seq = self.entries.len() as u64;
        self.entries.push(Bid {
            bidder_id,
            amount,
            placed_at,
            seq,
        });
        self.entries.last().expect("just pushed")
    }

    /// The standing highest bid, if any.
    pub fn current(&self) -> Option<&Bid> {
        self.entries.last()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bid> {
        self.entries.iter()
    }

    /// Distinct bidders ranked by their best bid, price-descending, ties
    /// broken by whoever reached that price first.  At most `limit` entries.
    pub fn ranked_bidders(&self, limit: usize) -> Vec<(UserId, Price)> {
        let mut best: Vec<(UserId, Price, u64)> = Vec::new();
        for bid in &self.entries {
            match best.iter_mut().find(|(b, _, _)| *b == bid.bidder_id) {
                Some(entry) if bid.amount > entry.1 => {
                    entry.1 = bid.amount;
                    entry.2 = bid.seq;
                }
                Some(_) => {}
                None => best.push((bid.bidder_id, bid.amount, bid.seq)),
            }
        }
        best.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        best.into_iter()
            .take(limit)
            .map(|(bidder, amount, _)| (bidder, amount))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bidder() -> UserId {
        UserId::new()
    }

    #[test]
    fn sequence_numbers_follow_admission_order() {
        let mut ledger = BidLedger::default();
        let now = Utc::now();
        ledger.append(bidder(), 100, now);
        ledger.append(bidder(), 150, now);
        let last = ledger.append(bidder(), 200, now);
        assert_eq!(last.seq, 2);
        assert_eq!(ledger.current().unwrap().amount, 200);
    }

    #[test]
    fn ranking_keeps_each_bidder_once_at_their_best() {
        let mut ledger = BidLedger::default();
        let now = Utc::now();
        let (a, b, c) = (bidder(), bidder(), bidder());
        ledger.append(a, 100, now);
        ledger.append(b, 150, now);
        ledger.append(a, 200, now);
        ledger.append(c, 120, now);

        let ranked = ledger.ranked_bidders(3);
        assert_eq!(ranked, vec![(a, 200), (b, 150), (c, 120)]);
    }

    #[test]
    fn ranking_truncates_to_limit() {
        let mut ledger = BidLedger::default();
        let now = Utc::now();
        for amount in [100u64, 150, 200, 250] {
            ledger.append(bidder(), amount, now);
        }
        assert_eq!(ledger.ranked_bidders(3).len(), 3);
        assert_eq!(ledger.ranked_bidders(3)[0].1, 250);
    }
}
