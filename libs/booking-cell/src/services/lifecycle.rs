use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AppointmentStatus, BookingError};

/// The one transition table for appointment status. Everything that
/// mutates status goes through `validate_status_transition`.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), BookingError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        let valid_transitions = self.get_valid_transitions(current_status);

        if !valid_transitions.contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(BookingError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// All valid next statuses for a given current status.
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::InProgress => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
            AppointmentStatus::NoShow => vec![],
        }
    }

    /// Channel identifier handed to the video transport once an
    /// appointment is confirmed. Derived, never stored.
    pub fn video_channel_id(&self, appointment_id: &Uuid) -> String {
        format!("session_{}", appointment_id)
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn pending_confirms_or_cancels_only() {
        let lifecycle = AppointmentLifecycleService::new();
        let next = lifecycle.get_valid_transitions(AppointmentStatus::Pending);

        assert!(next.contains(&AppointmentStatus::Confirmed));
        assert!(next.contains(&AppointmentStatus::Cancelled));
        assert!(!next.contains(&AppointmentStatus::NoShow));
        assert!(!next.contains(&AppointmentStatus::Completed));
    }

    #[test]
    fn confirmed_can_start_cancel_or_no_show() {
        let lifecycle = AppointmentLifecycleService::new();
        let next = lifecycle.get_valid_transitions(AppointmentStatus::Confirmed);

        assert_eq!(
            next,
            vec![
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ]
        );
    }

    #[test]
    fn in_progress_completes_or_no_shows() {
        let lifecycle = AppointmentLifecycleService::new();
        let next = lifecycle.get_valid_transitions(AppointmentStatus::InProgress);

        assert_eq!(next, vec![AppointmentStatus::Completed, AppointmentStatus::NoShow]);
    }

    #[test]
    fn terminal_states_admit_nothing() {
        let lifecycle = AppointmentLifecycleService::new();

        for status in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert!(lifecycle.get_valid_transitions(status).is_empty());
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn invalid_transition_is_rejected_with_both_states() {
        let lifecycle = AppointmentLifecycleService::new();

        let err = lifecycle
            .validate_status_transition(AppointmentStatus::Completed, AppointmentStatus::Pending)
            .unwrap_err();

        assert_matches!(
            err,
            BookingError::InvalidTransition {
                from: AppointmentStatus::Completed,
                to: AppointmentStatus::Pending,
            }
        );
    }

    #[test]
    fn video_channel_id_is_derived_from_appointment() {
        let lifecycle = AppointmentLifecycleService::new();
        let id = Uuid::new_v4();

        assert_eq!(lifecycle.video_channel_id(&id), format!("session_{}", id));
    }
}
