//! Mapping of sqlx errors onto [`StoreError`].

use concert_booking_core::store::StoreError;
use concert_booking_core::{ConcertId, SeatNumber};

/// Any failure that is not a domain outcome.
pub(crate) fn unavailable(error: sqlx::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

/// Map an insert failure on `bookings`.
///
/// The (concert, seat) unique constraint becomes [`StoreError::DuplicateSeat`]
/// and the concert foreign key becomes [`StoreError::NotFound`].
pub(crate) fn booking_insert(
    error: sqlx::Error,
    concert_id: ConcertId,
    seat: SeatNumber,
) -> StoreError {
    if let Some(db_error) = error.as_database_error() {
        if db_error.is_unique_violation() {
            return StoreError::DuplicateSeat { concert_id, seat };
        }
        if db_error.is_foreign_key_violation() {
            return StoreError::NotFound(concert_id);
        }
    }
    unavailable(error)
}

/// A stored value that does not fit the domain type.
pub(crate) fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("Corrupt {what}: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_unavailable() {
        let concert_id = ConcertId::new();
        let error = booking_insert(sqlx::Error::PoolTimedOut, concert_id, SeatNumber::MIN);
        assert!(matches!(error, StoreError::Unavailable(_)));
    }

    #[test]
    fn corrupt_rows_are_unavailable() {
        assert_eq!(
            corrupt("seat_number", -1),
            StoreError::Unavailable("Corrupt seat_number: -1".to_string())
        );
    }
}
