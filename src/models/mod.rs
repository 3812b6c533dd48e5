pub mod user;
pub mod venue;
pub mod booking;
pub mod payment;
pub mod review;

pub use user::User;
pub use venue::{Category, Venue, VenueImage};
pub use booking::Booking;
pub use payment::Payment;
pub use review::Review;
