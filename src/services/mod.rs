// Pricing
pub mod pricing;
pub mod promotions;
pub mod tax;

// Cart lifecycle
pub mod carts;

// Checkout and payment-driven booking
pub mod booking_materializer;
pub mod payment_intents;
