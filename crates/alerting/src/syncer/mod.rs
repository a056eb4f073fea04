//! Syncers that keep persisted config and user-visible state current.

pub mod config;
pub mod state;

pub use config::{ConfigSyncReport, ConfigSyncer};
pub use state::{reconcile, Reconcile, StateSyncReport, StateSyncer};
