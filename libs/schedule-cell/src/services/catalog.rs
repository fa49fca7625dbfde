use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{ScheduleError, SlotCatalog, TimeSlot};

/// Read access to the platform-wide time slot catalog. The catalog is the
/// single source of truth for slot identity; availability and override
/// rows reference slots by id only.
pub struct CatalogService {
    supabase: SupabaseClient,
}

impl CatalogService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn load_catalog(&self, auth_token: Option<&str>) -> Result<SlotCatalog, ScheduleError> {
        debug!("Loading time slot catalog");

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            "/rest/v1/time_slots?order=start_time.asc",
            auth_token,
            None,
        ).await?;

        let slots: Vec<TimeSlot> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<TimeSlot>, _>>()?;

        debug!("Catalog loaded with {} slots", slots.len());
        Ok(SlotCatalog::from_rows(slots))
    }

    pub async fn get_slot(
        &self,
        slot_id: &Uuid,
        auth_token: Option<&str>,
    ) -> Result<TimeSlot, ScheduleError> {
        let path = format!("/rest/v1/time_slots?id=eq.{}", slot_id);

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await?;

        let row = result
            .into_iter()
            .next()
            .ok_or(ScheduleError::UnknownTimeSlot(*slot_id))?;

        let slot: TimeSlot = serde_json::from_value(row)?;
        Ok(slot)
    }
}
