//! Provider adapters for morph.
//!
//! A [`ProviderAdapter`] wraps one [`morph_protocol::ImageProvider`] and turns
//! every call into a [`morph_protocol::ProviderOutcome`]: it short-circuits
//! unconfigured providers, bounds each call with the provider's timeout,
//! contains panics, prices successful results and prefixes failure messages
//! with the provider name.

mod adapter;
mod catalog;
mod gateway;
mod pricing;
mod registry;
mod simulated;

pub use adapter::{ProviderAdapter, ProviderProfile};
pub use catalog::{VendorProfile, vendor_profiles};
pub use gateway::HttpGatewayProvider;
pub use pricing::PricingModel;
pub use registry::{ProviderDescriptor, ProviderRegistry, ProviderSelection};
pub use simulated::{SimulatedBehavior, SimulatedFailure, SimulatedProvider};
