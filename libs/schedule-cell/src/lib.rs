pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

// Re-export all models and services for external use
pub use models::*;
pub use services::*;

// Specifically re-export the resolution types booking flows depend on
pub use models::{
    BookedWindow, DayResolution, MonthlyRule, OverrideKind, RecurrencePattern,
    ResolveDayQuery, ScheduleOverride, SlotCatalog, TimeSlot, WeeklySchedule,
};
