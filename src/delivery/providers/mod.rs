pub mod legacy;
pub mod vtpass;

pub use legacy::LegacyProvider;
pub use vtpass::VtpassProvider;
