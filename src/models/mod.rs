pub mod accommodation;
pub mod booking;

pub use accommodation::{Accommodation, AccommodationRegistry};
pub use booking::{Booking, BookingStatus, DepositStatus, GuestContact, PaymentStatus};
