//! Donation alert detection over raw BGR frames.
//!
//! [`temporal::TemporalDetector`] keeps a three-frame window and isolates
//! pixels that just appeared; [`locator::RegionLocator`] finds the colored
//! header and amount text among them; [`debounce::Debouncer`] drops repeats
//! of the same alert.

pub mod blobs;
pub mod debounce;
pub mod hsv;
pub mod locator;
pub mod mask;
pub mod temporal;

pub use debounce::Debouncer;
pub use locator::{DonationRegion, Rejection, RegionLocator};
pub use temporal::{Detection, TemporalDetector};
