//! Domain types for concert booking.
//!
//! Identifiers are UUID newtypes so a `ConcertId` can never be passed where a
//! `UserId` is expected. Prices are integer cents; seat numbers are positive by
//! construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a concert
    ConcertId
);

uuid_id!(
    /// Unique identifier for a booking, assigned by the booking store
    BookingId
);

uuid_id!(
    /// Opaque identity of an authenticated user
    ///
    /// Supplied by the authentication layer; this crate never inspects it.
    UserId
);

// ============================================================================
// Value Objects
// ============================================================================

/// A seat number within a concert (always ≥ 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SeatNumber(u32);

impl SeatNumber {
    /// The first seat.
    pub const MIN: Self = Self(1);

    /// Creates a seat number, returning `None` for zero.
    #[must_use]
    pub const fn new(number: u32) -> Option<Self> {
        if number == 0 { None } else { Some(Self(number)) }
    }

    /// Returns the seat number
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for SeatNumber {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "seat number must be at least 1".to_string())
    }
}

impl TryFrom<i32> for SeatNumber {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .map_err(|_| format!("seat number out of range: {value}"))
            .and_then(Self::try_from)
    }
}

impl From<SeatNumber> for u32 {
    fn from(seat: SeatNumber) -> Self {
        seat.0
    }
}

impl fmt::Display for SeatNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount as a decimal number of currency units (e.g. `49.99`).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Ticket prices are far below 2^52 cents
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Converts a decimal amount back into cents, rounding to the nearest cent.
    ///
    /// Returns `None` for negative or non-finite input.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_decimal(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        Some(Self((amount * 100.0).round() as u64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Concert
// ============================================================================

/// A concert and its seat inventory.
///
/// `available_seats` only ever changes through the inventory store's
/// conditional decrement, which keeps `0 ≤ available_seats ≤ total_seats`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concert {
    /// Concert identity
    pub id: ConcertId,
    /// Display name
    pub name: String,
    /// Venue
    pub venue: String,
    /// When the concert takes place
    pub date: DateTime<Utc>,
    /// Unit ticket price
    pub price: Money,
    /// Capacity, fixed at creation
    pub total_seats: u32,
    /// Seats not yet sold
    pub available_seats: u32,
    /// When the concert was created
    pub created_at: DateTime<Utc>,
}

impl Concert {
    /// Returns `true` if no seats remain
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.available_seats == 0
    }

    /// Number of seats already sold
    #[must_use]
    pub const fn sold_seats(&self) -> u32 {
        self.total_seats.saturating_sub(self.available_seats)
    }
}

/// Input for creating a concert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConcert {
    /// Display name
    pub name: String,
    /// Venue
    pub venue: String,
    /// When the concert takes place
    pub date: DateTime<Utc>,
    /// Unit ticket price
    pub price: Money,
    /// Capacity; all seats start available
    pub total_seats: u32,
}

// ============================================================================
// Booking
// ============================================================================

/// Lifecycle status of a booking.
///
/// Only `Confirmed` is produced today. `Pending` and `Cancelled` are reserved
/// for hold and cancellation flows and must survive a round trip through
/// storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Seat held, not yet confirmed
    Pending,
    /// Seat sold
    Confirmed,
    /// Booking cancelled
    Cancelled,
}

impl BookingStatus {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse status from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns the offending string if it is not a known status.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("Invalid booking status: {other}")),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A booking as stored: one seat of one concert for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identity (assigned by the store)
    pub id: BookingId,
    /// Who booked
    pub user_id: UserId,
    /// Which concert
    pub concert_id: ConcertId,
    /// Which seat
    pub seat_number: SeatNumber,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Insert time (assigned by the store)
    pub created_at: DateTime<Utc>,
}

/// A booking before the store has assigned identity and creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewBooking {
    /// Who books
    pub user_id: UserId,
    /// Which concert
    pub concert_id: ConcertId,
    /// Which seat
    pub seat_number: SeatNumber,
    /// Initial status
    pub status: BookingStatus,
}

impl NewBooking {
    /// A confirmed booking for the given seat.
    #[must_use]
    pub const fn confirmed(user_id: UserId, concert_id: ConcertId, seat_number: SeatNumber) -> Self {
        Self {
            user_id,
            concert_id,
            seat_number,
            status: BookingStatus::Confirmed,
        }
    }
}
