//! Gateway adapter implementations.

mod ach;
mod checkout;
mod stripe;

pub use ach::AchConnector;
pub use checkout::CheckoutConnector;
pub use stripe::StripeConnector;
