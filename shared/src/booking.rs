use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BookingError;
use crate::time::{
    booking_window, compute_end_time, format_date, format_time, parse_date, parse_time,
    TimeRange, DEFAULT_DURATION_MINUTES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Paid,
    Pending,
}

impl PaymentStatus {
    pub fn as_db(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Pending => "PENDING",
        }
    }
}

/// Processing state of a payment-provider event in the webhook ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Processing,
    Completed,
}

impl EventStatus {
    pub fn as_db(&self) -> &'static str {
        match self {
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "completed" => EventStatus::Completed,
            _ => EventStatus::Processing,
        }
    }
}

pub mod metadata_keys {
    pub const TABLE_IDS: &str = "table_ids";
    pub const BOOKING_DATE: &str = "booking_date";
    pub const BOOKING_TIME: &str = "booking_time";
    pub const END_TIME: &str = "end_time";
    pub const TENANT_ID: &str = "tenant_id";
    pub const BOOKING_REF: &str = "booking_ref";
    pub const CUSTOMER_NAME: &str = "customer_name";
    pub const CUSTOMER_EMAIL: &str = "customer_email";
    pub const PARTY_SIZE: &str = "party_size";
    pub const RECEIVE_OFFERS: &str = "receive_offers";
}

/// Booking facts carried through the hosted checkout as opaque string metadata.
///
/// The payment provider only confirms that money moved; everything the webhook
/// needs to fulfill the reservation travels in this structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingMetadata {
    pub table_ids: Vec<i32>,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub tenant_id: String,
    pub booking_ref: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub party_size: Option<i32>,
    pub receive_offers: bool,
}

impl BookingMetadata {
    pub fn end_time(&self) -> NaiveTime {
        compute_end_time(self.start_time, DEFAULT_DURATION_MINUTES)
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::starting_at(self.start_time, DEFAULT_DURATION_MINUTES)
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        use metadata_keys::*;

        let tables = self
            .table_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut pairs = vec![
            (TABLE_IDS.to_string(), tables),
            (BOOKING_DATE.to_string(), format_date(self.booking_date)),
            (BOOKING_TIME.to_string(), format_time(self.start_time)),
            (END_TIME.to_string(), format_time(self.end_time())),
            (TENANT_ID.to_string(), self.tenant_id.clone()),
            (BOOKING_REF.to_string(), self.booking_ref.clone()),
            (RECEIVE_OFFERS.to_string(), self.receive_offers.to_string()),
        ];
        if let Some(name) = &self.customer_name {
            pairs.push((CUSTOMER_NAME.to_string(), name.clone()));
        }
        if let Some(email) = &self.customer_email {
            pairs.push((CUSTOMER_EMAIL.to_string(), email.clone()));
        }
        if let Some(size) = self.party_size {
            pairs.push((PARTY_SIZE.to_string(), size.to_string()));
        }
        pairs
    }

    /// Parses the metadata object of a completed checkout.
    ///
    /// Tenant id and booking reference are checked first: without them the
    /// event cannot be traced back to a reservation at all.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, BookingError> {
        use metadata_keys::*;

        let tenant_id = required(map, TENANT_ID)?.to_string();
        let booking_ref = required(map, BOOKING_REF)?.to_string();

        let table_ids = parse_table_ids(required(map, TABLE_IDS)?)?;
        let booking_date = parse_date(required(map, BOOKING_DATE)?)?;
        let start_time = parse_time(required(map, BOOKING_TIME)?)?;
        booking_window(start_time)?;

        let party_size = match optional(map, PARTY_SIZE) {
            Some(raw) => Some(raw.parse::<i32>().map_err(|_| {
                BookingError::Validation(format!("invalid party_size '{raw}'"))
            })?),
            None => None,
        };

        Ok(Self {
            table_ids,
            booking_date,
            start_time,
            tenant_id,
            booking_ref,
            customer_name: optional(map, CUSTOMER_NAME).map(str::to_string),
            customer_email: optional(map, CUSTOMER_EMAIL).map(str::to_string),
            party_size,
            receive_offers: optional(map, RECEIVE_OFFERS) == Some("true"),
        })
    }
}

/// Parses a comma-separated list of table ids, e.g. `"5,6"`.
pub fn parse_table_ids(raw: &str) -> Result<Vec<i32>, BookingError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i32>()
                .map_err(|_| BookingError::Validation(format!("invalid table id '{s}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(BookingError::Validation("no table ids".to_string()));
    }
    Ok(ids)
}

fn optional<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required<'a>(map: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, BookingError> {
    optional(map, key).ok_or(BookingError::MissingMetadata(key))
}
