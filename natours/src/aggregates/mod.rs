//! Reducers for the booking workflows.
//!
//! - Checkout: opens payment sessions and finalizes paid ones
//! - Refund: traveler requests and admin decisions

pub mod checkout;
pub mod refund;

pub use checkout::{CheckoutAction, CheckoutEnvironment, CheckoutReducer, CheckoutState};
pub use refund::{RefundAction, RefundEnvironment, RefundReducer, RefundState};
