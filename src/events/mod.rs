//! Board events for hosts that surface notices to the user.
//!
//! Every notice the engine raises (nothing to undo, board full, save failed,
//! a missing asset) is published on an [`EventBus`]. Subscribers choose the
//! categories they want and receive events over a bounded channel; a
//! subscriber that stops draining its channel is dropped instead of blocking
//! the board.
//!
//! # Example
//!
//! ```ignore
//! let handle = board.events().subscribe(SubscriptionConfig {
//!     filter: EventFilter::notices(),
//!     ..Default::default()
//! });
//!
//! for event in handle.drain() {
//!     if let BoardEvent::CapacityReached { max } = event {
//!         println!("Only {max} images per board");
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::EventBus;
pub use types::{
    BoardEvent, DropReason, EventCategory, EventFilter, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};
