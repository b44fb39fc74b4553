//! Domain models for the clinic ledger.

mod consultation;
mod financial;
mod journal;
mod patient;

pub use consultation::*;
pub use financial::*;
pub use journal::*;
pub use patient::*;
