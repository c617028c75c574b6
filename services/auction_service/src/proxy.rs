//! Proxy-bid resolution for timed auctions.
//!
//! A classic English proxy mechanism: every bidder holds one private maximum
//! per auction, the system bids on their behalf, and the visible price is
//! the runner-up's maximum plus one increment, capped at the leader's own
//! maximum.  Resolution is a pure computation over a [`ProxyBook`] snapshot
//! so its determinism is unit-testable without the surrounding engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veiling_common::{Price, UserId};

use crate::error::ValidationFailure;

/// One bidder's standing maximum for one auction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyBid {
    pub bidder_id: UserId,
    pub max_bid: Price,
    /// First-submission time, preserved across raises; the tie-breaker.
    pub first_submitted: DateTime<Utc>,
    pub active: bool,
}

/// What a single submission changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub leader_id: UserId,
    pub visible_price: Price,
    /// The displaced previous leader, when the lead changed hands.
    pub outbid: Option<UserId>,
}

/// The set of active proxy bids for one auction, at most one row per bidder.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxyBook {
    bids: Vec<ProxyBid>,
}

impl ProxyBook {
    /// The current leader and visible price, or `None` before the first bid.
    ///
    /// With a single active bid the visible price is the auction's start
    /// price; with two or more it is the runner-up's max plus one increment,
    /// capped at the leader's max.
    pub fn standing(
        &self,
        start_price: Price,
        increment_at: impl Fn(Price) -> Price,
    ) -> Option<(UserId, Price)> {
        let mut ranked = self.ranked(usize::MAX);
        if ranked.is_empty() {
            return None;
        }
        let leader = ranked.remove(0);
        let visible = match ranked.first() {
            Some(second) => leader
                .max_bid
                .min(second.max_bid + increment_at(second.max_bid)),
            None => start_price,
        };
        Some((leader.bidder_id, visible))
    }

    /// Apply one submission and return the new standing.
    ///
    /// Rejections leave the book untouched: a raise must strictly exceed the
    /// bidder's own max, a newcomer must beat the visible price (the first
    /// bid only has to meet the start price), and raising never lets the
    /// leader lower their commitment.
    pub fn apply(
        &mut self,
        bidder_id: UserId,
        new_max: Price,
        submitted_at: DateTime<Utc>,
        start_price: Price,
        increment_at: impl Fn(Price) -> Price,
    ) -> Result<Resolution, ValidationFailure> {
        let previous = self.standing(start_price, &increment_at);

        if let Some(existing) = self.row(bidder_id) {
            if new_max <= existing.max_bid {
                return Err(ValidationFailure::MaxBidNotRaised);
            }
        }
        match previous {
            Some((leader, visible)) if leader != bidder_id && new_max <= visible => {
                return Err(ValidationFailure::MaxBidBelowVisiblePrice);
            }
            None if new_max < start_price => {
                return Err(ValidationFailure::MaxBidBelowVisiblePrice);
            }
            _ => {}
        }

        match self.bids.iter_mut().find(|b| b.bidder_id == bidder_id) {
            Some(row) => {
                row.max_bid = new_max;
                row.active = true;
            }
            None => self.bids.push(ProxyBid {
                bidder_id,
                max_bid: new_max,
                first_submitted: submitted_at,
                active: true,
            }),
        }

        let (leader_id, visible_price) = self
            .standing(start_price, &increment_at)
            .expect("book has at least one active bid after upsert");

        let outbid = match previous {
            Some((prev_leader, _))
                if prev_leader != leader_id && self.is_active(prev_leader) =>
            {
                Some(prev_leader)
            }
            _ => None,
        };

        Ok(Resolution {
            leader_id,
            visible_price,
            outbid,
        })
    }

    /// Drop a bidder's standing max (banned-bidder voiding).  Returns whether
    /// a row was actually retracted.
    pub fn retract(&mut self, bidder_id: UserId) -> bool {
        match self.bids.iter_mut().find(|b| b.bidder_id == bidder_id && b.active) {
            Some(row) => {
                row.active = false;
                true
            }
            None => false,
        }
    }

    /// Active bids ranked by max descending, ties to the earliest first
    /// submission.  At most `limit` entries.
    pub fn ranked(&self, limit: usize) -> Vec<ProxyBid> {
        let mut active: Vec<ProxyBid> =
            self.bids.iter().filter(|b| b.active).cloned().collect();
        active.sort_by(|a, b| {
            b.max_bid
                .cmp(&a.max_bid)
                .then(a.first_submitted.cmp(&b.first_submitted))
        });
        active.truncate(limit);
        active
    }

    pub fn is_empty(&self) -> bool {
        !self.bids.iter().any(|b| b.active)
    }

    fn is_active(&self, bidder_id: UserId) -> bool {
        self.bids
            .iter()
            .any(|b| b.bidder_id == bidder_id && b.active)
    }

    fn row(&self, bidder_id: UserId) -> Option<&ProxyBid> {
        self.bids
            .iter()
            .find(|b| b.bidder_id == bidder_id && b.active)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    const START: Price = 100;

    fn inc(_: Price) -> Price {
        10
    }

    fn t(offset_secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn first_bid_sets_visible_price_to_start_price() {
        let mut book = ProxyBook::default();
        let a = UserId::new();
        let res = book.apply(a, 500, t(0), START, inc).unwrap();
        assert_eq!(res.leader_id, a);
        assert_eq!(res.visible_price, START);
        assert_eq!(res.outbid, None);
    }

    #[test]
    fn first_bid_below_start_price_is_rejected() {
        let mut book = ProxyBook::default();
        let err = book.apply(UserId::new(), START - 1, t(0), START, inc).unwrap_err();
        assert_eq!(err, ValidationFailure::MaxBidBelowVisiblePrice);
        assert!(book.is_empty());
    }

    #[test]
    fn runner_up_drives_the_visible_price() {
        let mut book = ProxyBook::default();
        let (a, b) = (UserId::new(), UserId::new());
        book.apply(a, 150, t(0), START, inc).unwrap();
        let res = book.apply(b, 300, t(1), START, inc).unwrap();
        assert_eq!(res.leader_id, b);
        assert_eq!(res.visible_price, 160); // a's 150 + increment
        assert_eq!(res.outbid, Some(a));
    }

    #[test]
    fn visible_price_is_capped_at_the_leaders_max() {
        let mut book = ProxyBook::default();
        let (a, b) = (UserId::new(), UserId::new());
        book.apply(a, 150, t(0), START, inc).unwrap();
        // b beats a by less than one increment
        let res = book.apply(b, 155, t(1), START, inc).unwrap();
        assert_eq!(res.leader_id, b);
        assert_eq!(res.visible_price, 155);
    }

    #[test]
    fn raising_own_max_keeps_lead_without_outbid() {
        let mut book = ProxyBook::default();
        let (a, b) = (UserId::new(), UserId::new());
        book.apply(a, 200, t(0), START, inc).unwrap();
        book.apply(b, 150, t(1), START, inc).unwrap();
        let res = book.apply(a, 400, t(2), START, inc).unwrap();
        assert_eq!(res.leader_id, a);
        assert_eq!(res.visible_price, 160);
        assert_eq!(res.outbid, None);
    }

    #[test]
    fn lowering_or_repeating_own_max_is_rejected() {
        let mut book = ProxyBook::default();
        let a = UserId::new();
        book.apply(a, 200, t(0), START, inc).unwrap();
        assert_eq!(
            book.apply(a, 200, t(1), START, inc).unwrap_err(),
            ValidationFailure::MaxBidNotRaised
        );
        assert_eq!(
            book.apply(a, 150, t(1), START, inc).unwrap_err(),
            ValidationFailure::MaxBidNotRaised
        );
    }

    #[test]
    fn newcomer_below_visible_price_is_rejected() {
        let mut book = ProxyBook::default();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        book.apply(a, 300, t(0), START, inc).unwrap();
        book.apply(b, 200, t(1), START, inc).unwrap();
        // visible price is now 210
        assert_eq!(
            book.apply(c, 210, t(2), START, inc).unwrap_err(),
            ValidationFailure::MaxBidBelowVisiblePrice
        );
        assert_eq!(book.ranked(10).len(), 2);
    }

    #[test]
    fn equal_maxes_go_to_the_earliest_submission() {
        let mut book = ProxyBook::default();
        let (a, b) = (UserId::new(), UserId::new());
        book.apply(a, 150, t(0), START, inc).unwrap();
        // b matching a's max exactly does not beat the visible price once a
        // leads at their own cap, so raise b above and then check ranking of
        // an exact tie built the other way round.
        let res = book.apply(b, 150 + 1, t(5), START, inc).unwrap();
        assert_eq!(res.leader_id, b);

        // fresh book, true tie built by raising into b's max
        let mut book = ProxyBook::default();
        book.apply(a, 150, t(0), START, inc).unwrap();
        book.apply(b, 300, t(1), START, inc).unwrap();
        let res = book.apply(a, 300, t(2), START, inc).unwrap();
        // a's original t0 submission time survives the raise, so a takes the
        // tie at 300 despite b reaching that max first
        assert_eq!(res.leader_id, a);
        let ranked = book.ranked(2);
        assert_eq!(ranked[0].bidder_id, a);
        assert_eq!(ranked[1].bidder_id, b);
    }

    /// The §-style determinism example: A 100→160, B 150, in either order.
    #[test]
    fn final_state_is_independent_of_arrival_order() {
        let (a, b) = (UserId::new(), UserId::new());
        let start = 50;

        let mut forward = ProxyBook::default();
        forward.apply(a, 100, t(0), start, inc).unwrap();
        forward.apply(b, 150, t(1), start, inc).unwrap();
        let last = forward.apply(a, 160, t(2), start, inc).unwrap();
        assert_eq!(last.leader_id, a);
        assert_eq!(last.visible_price, 160); // capped: 150 + 10 = 160

        let mut reversed = ProxyBook::default();
        reversed.apply(b, 150, t(1), start, inc).unwrap();
        reversed.apply(a, 160, t(2), start, inc).unwrap();

        let f = forward.standing(start, inc).unwrap();
        let r = reversed.standing(start, inc).unwrap();
        assert_eq!(f, r);
    }

    #[test]
    fn retract_removes_the_bidder_from_standing_and_ranking() {
        let mut book = ProxyBook::default();
        let (a, b) = (UserId::new(), UserId::new());
        book.apply(a, 300, t(0), START, inc).unwrap();
        book.apply(b, 200, t(1), START, inc).unwrap();

        assert!(book.retract(a));
        assert!(!book.retract(a));

        let (leader, visible) = book.standing(START, inc).unwrap();
        assert_eq!(leader, b);
        assert_eq!(visible, START);
        assert_eq!(book.ranked(10).len(), 1);
    }

    #[test]
    fn first_submission_time_survives_raises() {
        let mut book = ProxyBook::default();
        let a = UserId::new();
        book.apply(a, 200, t(0), START, inc).unwrap();
        book.apply(a, 400, t(60), START, inc).unwrap();
        let row = &book.ranked(1)[0];
        assert_eq!(row.first_submitted, t(0));
        assert!(row.first_submitted + Duration::seconds(60) == t(60));
    }
}
