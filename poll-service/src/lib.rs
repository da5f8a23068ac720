//! Poll service: a ballot ledger with live tally broadcasting.
//!
//! Votes go through [`coordinator::VoteCoordinator`], which writes the
//! ballot to the [`ledger`], projects the poll's tally and pushes it to the
//! viewers registered in [`subscription`].

pub mod auth_middleware;
pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod polls;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod subscription;
pub mod tally;
pub mod types;
pub mod utils;
pub mod votes;
pub mod ws_server;

#[cfg(test)]
mod testing;
