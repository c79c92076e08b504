//! Tag-filtered, best-effort pub/sub event bus shared by the master, the
//! minion, and local clients.

pub mod bus;
pub mod filter;

pub use bus::{EventBus, Subscription};
pub use filter::tag_matches;
