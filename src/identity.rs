//! QR evidence accumulation and carrier identity resolution.

mod carrier;
mod resolver;

pub use carrier::{CarrierId, CarrierIdentity, QrReading};
pub use resolver::{IdentityChange, IdentityConfig, IdentityResolver, TrackPosition};
