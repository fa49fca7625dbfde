pub mod booking;
pub mod conflict;
pub mod lifecycle;

pub use booking::AppointmentBookingService;
pub use conflict::{evaluate, windows_overlap, SlotChoice};
pub use lifecycle::AppointmentLifecycleService;
