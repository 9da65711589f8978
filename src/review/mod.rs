//! RFI review core: stateless review sessions over an item data provider.

pub mod aggregator;
pub mod codec;
pub mod dispatcher;
pub mod intent;
pub mod model;
pub mod provider;
pub mod routes;
pub mod screen;
pub mod service;

pub use codec::ActionPayload;
pub use dispatcher::ActionDispatcher;
pub use intent::{IntentRouter, ReviewIntent};
pub use model::{ActionOutcome, BatchSummary, DispatchResult, Requester, ReviewAction, ReviewBatch};
pub use provider::{ItemDataProvider, ItemDetails, ProviderReply, ReasonCode};
pub use routes::review_routes;
pub use screen::{Screen, ScreenKind};
pub use service::ReviewService;
