//! Merges global parameters with derived time parameters and
//! schedule-time parameters.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

use crate::context::Property;

/// The well-known trigger key: when present, its value is parsed as a
/// sync date and four derived `*_time_stamp*` entries are added.
pub const SYNC_DATE_PARAM_NAME: &str = "syncDate";

/// One day in milliseconds minus one, i.e. 23:59:59.000 past midnight.
const END_OF_DAY_OFFSET_MS: i64 = 86_399 * 1000;

/// No external system in scope fixes the canonical constant name for
/// the schedule-time business parameter, so this crate names it
/// explicitly.
pub const SCHEDULE_TIME_PARAM_NAME: &str = "schedule_time";

/// Builds the merged global-parameters map from a serialized list of
/// `Property`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterBinder;

impl ParameterBinder {
    /// Deserialize `global_params_json` into a list of `Property`,
    /// derive `syncDate`-based timestamps (resolved in the host's local
    /// time zone), then overlay every property from the list so a
    /// user-supplied value always wins over a derived one.
    #[must_use]
    pub fn build_global_params_map(&self, global_params_json: &str) -> HashMap<String, String> {
        let properties: Vec<Property> = serde_json::from_str(global_params_json).unwrap_or_default();

        let mut map = HashMap::new();

        if let Some(sync_date) = properties
            .iter()
            .find(|p| p.prop == SYNC_DATE_PARAM_NAME)
            .map(|p| p.value.clone())
        {
            match Self::derive_sync_date_timestamps(&sync_date) {
                Some((start, end)) => {
                    map.insert("start_time_stamp".to_string(), start.to_string());
                    map.insert("end_time_stamp".to_string(), end.to_string());
                    map.insert("start_time_stamp_s".to_string(), (start / 1000).to_string());
                    map.insert("end_time_stamp_s".to_string(), (end / 1000).to_string());
                }
                None => {
                    for key in [
                        "start_time_stamp",
                        "end_time_stamp",
                        "start_time_stamp_s",
                        "end_time_stamp_s",
                    ] {
                        map.insert(key.to_string(), String::new());
                    }
                }
            }
        }

        // Last duplicate wins, and any user-supplied value overrides
        // the derived entries above.
        for property in &properties {
            map.insert(property.prop.clone(), property.value.clone());
        }

        map
    }

    /// Parse `yyyy-MM-dd` in the local time zone, normalize to
    /// midnight, and return `(start_time_stamp_ms, end_time_stamp_ms)`.
    fn derive_sync_date_timestamps(sync_date: &str) -> Option<(i64, i64)> {
        let date = NaiveDate::parse_from_str(sync_date, "%Y-%m-%d").ok()?;
        let midnight = date.and_hms_opt(0, 0, 0)?;
        let local: DateTime<Local> = Local.from_local_datetime(&midnight).single()?;
        let start = local.timestamp_millis();
        Some((start, start + END_OF_DAY_OFFSET_MS))
    }

    /// Emit the single schedule-time business parameter, formatted
    /// `yyyyMMddHHmmss`, or an empty map if no schedule time is set.
    #[must_use]
    pub fn pre_build_business_params(
        &self,
        schedule_time: Option<DateTime<Utc>>,
    ) -> HashMap<String, Property> {
        let mut map = HashMap::new();
        if let Some(ts) = schedule_time {
            let local: DateTime<Local> = ts.with_timezone(&Local);
            map.insert(
                SCHEDULE_TIME_PARAM_NAME.to_string(),
                Property::new(SCHEDULE_TIME_PARAM_NAME, local.format("%Y%m%d%H%M%S").to_string()),
            );
        }
        map
    }
}
