//! pglock command line tool
//!
//! Administration commands (`setup`, `inspect`, `unlock`) and runnable demos
//! of the lock protocol against PostgreSQL or the in-memory store.

pub mod cli;
pub mod commands;
pub mod config;
pub mod demo;
pub mod logging;
pub mod shutdown;
