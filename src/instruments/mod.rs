//! Instrument drivers.
//!
//! Each driver translates one vendor command dialect into the capability
//! traits in [`crate::core`]. The scan engine only ever sees those traits;
//! swapping hardware means swapping the driver behind the box.

pub mod gantry;
pub mod mock;
pub mod siglent;

pub use gantry::GantryController;
pub use mock::{MockDigitizer, MockPositioner};
pub use siglent::SiglentScope;
