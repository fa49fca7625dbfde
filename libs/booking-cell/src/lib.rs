pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

// Re-export all models and services for external use
pub use models::*;
pub use services::*;

// Specifically re-export the types other cells and the API binary use
pub use models::{
    slot_key, Appointment, AppointmentStatus, BookingRequest, BookingVerdict,
    PaymentStatus, SessionType,
};
pub use router::booking_routes;
