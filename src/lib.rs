//! RFI review: stateless batch review of items awaiting a request for information.

pub mod config;
pub mod error;
pub mod review;
pub mod store;
