//! Airtime and data purchase backend: wallet ledger, Paystack checkout,
//! VTU delivery and webhook reconciliation.

pub mod api;
pub mod config;
pub mod database;
pub mod delivery;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
