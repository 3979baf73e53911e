pub mod admission;
pub mod availability;
pub mod bookings;
pub mod channel;
pub mod deposits;
pub mod notify;
pub mod outbox;
pub mod payments;
pub mod sync;
