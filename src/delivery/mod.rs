//! Airtime and data delivery through upstream VTU providers

pub mod classification;
pub mod executor;
pub mod factory;
pub mod phone;
pub mod provider;
pub mod providers;
pub mod types;

pub use executor::DeliveryExecutor;
pub use factory::DeliveryProviderFactory;
pub use provider::DeliveryProvider;
pub use types::*;
