//! fitsync: local-first sync engine for the fitness tracker, with the SQLite
//! stores, the reference document store server, and CLI plumbing.

pub mod config;
pub mod db;
pub mod server;
pub mod sync;
