//! Caller-facing outcome of a booking request.

use crate::store::StoreError;
use crate::types::{ConcertId, SeatNumber};
use thiserror::Error;

/// Why a booking was not confirmed.
///
/// The caller sees exactly one of: a confirmed booking, [`SoldOut`](Self::SoldOut),
/// [`DuplicateSeat`](Self::DuplicateSeat) or
/// [`StoreUnavailable`](Self::StoreUnavailable). Failures after commit (cache
/// invalidation, publishing) never show up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The conditional decrement found no seat to claim.
    #[error("Concert {0} is sold out")]
    SoldOut(ConcertId),

    /// The requested seat number is already taken.
    #[error("Seat {seat} is already taken for concert {concert_id}")]
    DuplicateSeat {
        /// The concert
        concert_id: ConcertId,
        /// The contested seat
        seat: SeatNumber,
    },

    /// Persistence failed (including commit); the booking is not confirmed.
    #[error("Service unavailable: {0}")]
    StoreUnavailable(String),
}

impl BookingError {
    /// Machine-readable error code for the transport layer.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SoldOut(_) => "SOLD_OUT",
            Self::DuplicateSeat { .. } => "SEAT_TAKEN",
            Self::StoreUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// `true` if the caller can recover by choosing another seat or concert.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            // A missing concert and an exhausted one are deliberately the same answer.
            StoreError::NoSeatsAvailable(concert_id) | StoreError::NotFound(concert_id) => {
                Self::SoldOut(concert_id)
            },
            StoreError::DuplicateSeat { concert_id, seat } => Self::DuplicateSeat { concert_id, seat },
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
        }
    }
}
