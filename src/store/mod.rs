//! Persistence layer: libSQL-backed item store.

pub mod item_store;
pub mod migrations;

pub use item_store::ItemStore;
