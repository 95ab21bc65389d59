//! Core data types shared by the block processor, the stores and the sync
//! protocol: hashes, signature schemes, transactions, blocks, commit info and
//! consensus parameters.

pub mod auth;
pub mod block;
pub mod chain;
pub mod execution;
pub mod genesis;
pub mod hash;
pub mod inflight;
pub mod params;
pub mod transaction;
pub mod validator;
