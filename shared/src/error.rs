use thiserror::Error;

/// Name of the exclusion constraint that rejects overlapping paid bookings.
pub const BOOKING_OVERLAP_CONSTRAINT: &str = "bookings_no_overlap";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A paid or manual booking already occupies the slot.
    Booking,
    /// Another customer's checkout currently holds the slot.
    Hold,
}

impl ConflictKind {
    pub fn as_status(&self) -> &'static str {
        match self {
            ConflictKind::Booking => "conflict",
            ConflictKind::Hold => "hold_conflict",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BookingError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("requested table is no longer available")]
    Conflict {
        kind: ConflictKind,
        table_id: Option<i32>,
    },

    /// A field the completed checkout must carry is absent or blank.
    #[error("missing metadata field {0}")]
    MissingMetadata(&'static str),

    #[error("webhook signature rejected: {0}")]
    Signature(String),

    #[error("booking store unavailable: {0}")]
    TransientStore(String),

    #[error("payment provider error: {0}")]
    PaymentProvider(String),

    #[error("booking {booking_ref} paid but not fulfilled for tables {failed_tables:?}")]
    PartialFulfillment {
        booking_ref: String,
        failed_tables: Vec<i32>,
    },
}

impl BookingError {
    pub fn conflict(kind: ConflictKind, table_id: Option<i32>) -> Self {
        BookingError::Conflict { kind, table_id }
    }
}

/// Errors surfaced by the booking store implementations.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("slot overlaps an existing booking")]
    Overlap,

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn unavailable(e: impl std::fmt::Display) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match e {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Overlap,
            Error::DatabaseError(_, ref info)
                if info.constraint_name() == Some(BOOKING_OVERLAP_CONSTRAINT) =>
            {
                StoreError::Overlap
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Overlap => BookingError::conflict(ConflictKind::Booking, None),
            StoreError::Database(msg) => BookingError::TransientStore(msg),
        }
    }
}
