//! sea-orm entities for carts, promotions, payments and bookings.

pub mod booking;
pub mod commerce;
pub mod outbox_event;
