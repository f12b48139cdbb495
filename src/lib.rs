//! Shared-cost settlement for court bookings.
//!
//! An organizer books a court, invites friends, and asks them to chip in.
//! [`session::SettlementSession`] tracks one such request: which unpaid
//! participants are charged, whether the cost is split equally or by hand,
//! and whether the amounts reconcile before the requests go out through a
//! [`dispatch::PaymentDispatcher`]. [`wallet`] keeps the balances the shares
//! are eventually paid from.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod roster;
pub mod schemas;
pub mod session;
pub mod split;
pub mod store;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
