pub mod catalog;
pub mod overrides;
pub mod recurrence;
pub mod resolver;

pub use catalog::CatalogService;
pub use overrides::{effective_override, OverrideService};
pub use recurrence::{apply_pattern, build_weekly_map, weekday_number, week_of_month, whole_weeks_between};
pub use resolver::{resolve_day, AvailabilityService};
