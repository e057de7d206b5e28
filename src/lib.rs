//! Vendor to vendor barter negotiation with product rating aggregation.
//!
//! [`service::BarterService`] runs the offer lifecycle (propose, accept,
//! reject, counter, complete, expire) over a sled database.
//! [`rating::RatingService`] keeps product and vendor rating aggregates in
//! step with customer feedback, debouncing the vendor side.

pub mod barter;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod directory;
pub mod error;
pub mod logging;
pub mod notify;
pub mod rating;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod value;

pub use barter::{Barter, BarterStatus, OfferLine, PartyReview};
pub use error::{BarterError, ErrorKind, ValidationError};
pub use service::BarterService;
