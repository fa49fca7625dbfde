pub mod bridge;
pub mod feed;

pub use bridge::{ScheduleSubscription, ScheduleSyncBridge};
pub use feed::StoreChangeFeed;
