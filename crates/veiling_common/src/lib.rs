//! Veiling – shared marketplace primitives.
//!
//! This crate is the canonical place for types that every Veiling service
//! agrees on: entity identifiers, the money representation and a couple of
//! parsing helpers.  Keeping them in an isolated crate avoids cyclic
//! dependencies and makes sure we never end up with two incompatible
//! versions of the same `AuctionId` floating around in the dependency graph.
//!
//! The crate purposefully stays lightweight: anything specific to a single
//! service (the auction engine, the catalog, …) lives in that service.

#![forbid(unsafe_code)]

mod types;

pub use types::{
    AuctionId, CommonError, OrderId, Price, ProductId, Result, UserId,
};
