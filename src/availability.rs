//! Free booking slots per expert and day.
//!
//! All times are wall-clock values. Neither availability rules nor appointment timestamps
//! are normalized to a timezone, so an appointment stored as `11:00+02:00` occupies the
//! 11:00 slot.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::source::{decode_rows, TableSource};

pub const AVAILABILITY_TABLE: &str = "expert_availability";
pub const APPOINTMENTS_TABLE: &str = "appointments";

/// Weekly availability of an expert for one weekday
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Uuid,
    pub expert_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: i32,
    /// `HH:MM`, optionally with seconds
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expert_id: Uuid,
    #[serde(with = "wall_clock")]
    pub booked_at: NaiveDateTime,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "pending".to_string()
}

/// A bookable hour and its 12-hour display label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub hour: u32,
    pub label: String,
}

impl TimeSlot {
    pub fn new(hour: u32) -> Self {
        Self {
            hour,
            label: hour_label(hour),
        }
    }
}

/// `9` -> `9:00 AM`, `12` -> `12:00 PM`, `0` -> `12:00 AM`
pub fn hour_label(hour: u32) -> String {
    let (display, suffix) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{display}:00 {suffix}")
}

/// Extracts the hour from `HH:MM` or `HH:MM:SS`. Minutes are validated but ignored.
pub fn parse_hour(value: &str) -> StoreResult<u32> {
    let invalid = || StoreError::InvalidTime(value.to_string());
    let mut parts = value.trim().split(':');

    let hour: u32 = parts
        .next()
        .and_then(|h| h.parse().ok())
        .ok_or_else(invalid)?;
    let minute: u32 = parts
        .next()
        .and_then(|m| m.parse().ok())
        .ok_or_else(invalid)?;

    if hour > 24 || minute > 59 || (hour == 24 && minute != 0) {
        return Err(invalid());
    }
    Ok(hour)
}

/// Weekday index with Sunday as 0
pub fn weekday_index(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_sunday() as i32
}

/// Computes the free hourly slots of an expert on `date`.
///
/// Only the first available rule for the weekday is used when several exist. Appointments
/// of other experts or other days are ignored.
pub fn free_slots(
    rules: &[AvailabilityRule],
    appointments: &[Appointment],
    date: NaiveDate,
) -> StoreResult<Vec<TimeSlot>> {
    let weekday = weekday_index(date);
    let Some(rule) = rules
        .iter()
        .find(|rule| rule.day_of_week == weekday && rule.is_available)
    else {
        return Ok(Vec::new());
    };

    let matching = rules
        .iter()
        .filter(|rule| rule.day_of_week == weekday && rule.is_available)
        .count();
    if matching > 1 {
        debug!(
            "Expert {} has {} availability rules for weekday {}; using the first",
            rule.expert_id, matching, weekday
        );
    }

    let start = parse_hour(&rule.start_time)?;
    let end = parse_hour(&rule.end_time)?;

    let booked: HashSet<u32> = appointments
        .iter()
        .filter(|a| a.expert_id == rule.expert_id && a.booked_at.date() == date)
        .map(|a| a.booked_at.hour())
        .collect();

    Ok((start..end)
        .filter(|hour| !booked.contains(hour))
        .map(TimeSlot::new)
        .collect())
}

/// Reads availability and appointments from a table source and derives free slots.
///
/// Results are recomputed on every call and never cached.
#[derive(Clone)]
pub struct SlotCalculator {
    source: Arc<dyn TableSource>,
}

impl SlotCalculator {
    pub fn new(source: Arc<dyn TableSource>) -> Self {
        Self { source }
    }

    pub async fn available_slots(
        &self,
        expert_id: Uuid,
        date: NaiveDate,
    ) -> StoreResult<Vec<TimeSlot>> {
        let day_start = date.and_time(NaiveTime::MIN);
        let day_end = day_start + TimeDelta::days(1);

        let rules_query = Query::table(AVAILABILITY_TABLE)
            .eq("expert_id", expert_id)
            .eq("day_of_week", weekday_index(date))
            .eq("is_available", true)
            .order_by("start_time", true);
        let appointments_query = Query::table(APPOINTMENTS_TABLE)
            .eq("expert_id", expert_id)
            .gte("booked_at", day_start)
            .lt("booked_at", day_end);

        let (rule_rows, appointment_rows) = futures::try_join!(
            self.source.select(&rules_query),
            self.source.select(&appointments_query)
        )?;

        let rules: Vec<AvailabilityRule> = decode_rows(AVAILABILITY_TABLE, rule_rows)?;
        let appointments: Vec<Appointment> = decode_rows(APPOINTMENTS_TABLE, appointment_rows)?;
        let slots = free_slots(&rules, &appointments, date)?;

        debug!(
            "Expert {} has {} free slots on {} ({} booked)",
            expert_id,
            slots.len(),
            date,
            appointments.len()
        );
        Ok(slots)
    }

    /// Fails with [`StoreError::SlotUnavailable`] unless `at` starts a free slot
    pub async fn ensure_bookable(&self, expert_id: Uuid, at: NaiveDateTime) -> StoreResult<()> {
        let on_the_hour = at.minute() == 0 && at.second() == 0 && at.nanosecond() == 0;
        if on_the_hour {
            let slots = self.available_slots(expert_id, at.date()).await?;
            if slots.iter().any(|slot| slot.hour == at.hour()) {
                return Ok(());
            }
        }
        Err(StoreError::SlotUnavailable { expert_id, at })
    }

    /// Books a free slot and returns the stored appointment.
    ///
    /// A concurrent booking that wins the same slot between the check and the insert is
    /// caught by the `(expert_id, booked_at)` unique constraint.
    pub async fn book(
        &self,
        user_id: Uuid,
        expert_id: Uuid,
        at: NaiveDateTime,
    ) -> StoreResult<Appointment> {
        if let Err(err) = self.ensure_bookable(expert_id, at).await {
            warn!("Rejected booking for expert {} at {}: {}", expert_id, at, err);
            return Err(err);
        }

        let row = json!({
            "user_id": user_id,
            "expert_id": expert_id,
            "booked_at": at.format(wall_clock::FORMAT).to_string(),
            "status": default_status(),
        });
        let stored = match self.source.insert(APPOINTMENTS_TABLE, row).await {
            Ok(stored) => stored,
            Err(StoreError::Conflict(reason)) => {
                warn!("Lost booking race for expert {} at {}: {}", expert_id, at, reason);
                return Err(StoreError::SlotUnavailable { expert_id, at });
            }
            Err(err) => return Err(err),
        };
        let mut appointments: Vec<Appointment> = decode_rows(APPOINTMENTS_TABLE, vec![stored])?;
        appointments.pop().ok_or_else(|| StoreError::Decode {
            table: APPOINTMENTS_TABLE.to_string(),
            message: "insert returned no row".to_string(),
        })
    }
}

/// Serde adapter storing timestamps as offset-free wall-clock text
mod wall_clock {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S: Serializer>(
        value: &NaiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        crate::source::parse_wall_clock(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
    }
}
