/// Payment attempts and the immutable booking records they produce
pub mod booking;
pub mod booking_addon;
pub mod booking_consent;
pub mod booking_line_item;
pub mod booking_preference;
pub mod booking_totals;
pub mod payment_intent;

pub use booking::{BookingPaymentStatus, BookingStatus, Entity as Booking, Model as BookingModel};
pub use booking_addon::{Entity as BookingAddon, Model as BookingAddonModel};
pub use booking_consent::{Entity as BookingConsent, Model as BookingConsentModel};
pub use booking_line_item::{Entity as BookingLineItem, Model as BookingLineItemModel};
pub use booking_preference::{Entity as BookingPreference, Model as BookingPreferenceModel};
pub use booking_totals::{Entity as BookingTotals, Model as BookingTotalsModel};
pub use payment_intent::{
    Entity as PaymentIntent, Model as PaymentIntentModel, PaymentIntentStatus,
};
