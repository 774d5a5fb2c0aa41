//! Common test utilities for PostgreSQL integration testing

pub mod db;

pub use db::TestDatabase;
