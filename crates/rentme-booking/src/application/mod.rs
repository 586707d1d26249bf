//! Application layer for the Booking context.

pub mod command_handlers;
pub mod pricing;
pub mod query_handlers;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use rentme_bus::{CommandRegistry, QueryRegistry, RequestContext};
use rentme_core::clock::Clock;
use rentme_core::error::DomainError;

use crate::domain::commands::{
    AcceptBooking, CancelBooking, CheckInBooking, CheckOutBooking, ConfirmBooking,
    DeclineBooking, MarkNoShow, RequestBooking, SubmitReview,
};
use crate::domain::queries::{GetBooking, ListGuestBookings, ListHostBookings};
use crate::ports::BookingUnitOfWork;

pub use command_handlers::BookingHandlers;
pub use query_handlers::BookingQueries;

/// Request context of every booking operation.
pub type BookingContext = RequestContext<dyn BookingUnitOfWork>;

/// Registers every booking command and query.
///
/// # Errors
///
/// Returns `DomainError::DuplicateHandler` if a key was already taken.
pub fn register_handlers(
    commands: &mut CommandRegistry<dyn BookingUnitOfWork>,
    queries: &mut QueryRegistry<dyn BookingUnitOfWork>,
    clock: &Arc<dyn Clock>,
) -> Result<(), DomainError> {
    let handlers = BookingHandlers::new(Arc::clone(clock));
    commands.register::<RequestBooking, _>(handlers.clone())?;
    commands.register::<AcceptBooking, _>(handlers.clone())?;
    commands.register::<DeclineBooking, _>(handlers.clone())?;
    commands.register::<ConfirmBooking, _>(handlers.clone())?;
    commands.register::<CancelBooking, _>(handlers.clone())?;
    commands.register::<CheckInBooking, _>(handlers.clone())?;
    commands.register::<CheckOutBooking, _>(handlers.clone())?;
    commands.register::<MarkNoShow, _>(handlers.clone())?;
    commands.register::<SubmitReview, _>(handlers)?;

    let views = BookingQueries::new(Arc::clone(clock));
    queries.register::<GetBooking, _>(views.clone())?;
    queries.register::<ListGuestBookings, _>(views.clone())?;
    queries.register::<ListHostBookings, _>(views)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rentme_test_support::FixedClock;

    use super::*;
    use crate::application::testing::now;

    #[test]
    fn test_register_handlers_binds_every_key_once() {
        // Arrange
        let mut commands = CommandRegistry::new();
        let mut queries = QueryRegistry::new();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));

        // Act
        register_handlers(&mut commands, &mut queries, &clock).unwrap();
        let again = register_handlers(&mut commands, &mut queries, &clock);

        // Assert
        assert_eq!(
            commands.keys(),
            vec![
                "booking.cancel",
                "booking.request",
                "host.bookings.accept",
                "host.bookings.check_in",
                "host.bookings.check_out",
                "host.bookings.confirm",
                "host.bookings.decline",
                "host.bookings.no_show",
                "reviews.submit",
            ]
        );
        assert_eq!(
            again,
            Err(DomainError::DuplicateHandler("booking.request".into()))
        );
    }
}
