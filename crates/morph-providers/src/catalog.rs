//! Built-in vendor catalogue: name, conditioning, price and timeout of every
//! provider the API knows how to register.

use std::time::Duration;

use morph_protocol::ProviderKind;

use crate::adapter::ProviderProfile;
use crate::pricing::PricingModel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VendorProfile {
    pub name: &'static str,
    pub kind: ProviderKind,
    pub pricing: PricingModel,
    pub timeout: Duration,
    /// Environment variable holding the credential, `None` for local backends.
    pub credential_env: Option<&'static str>,
}

impl VendorProfile {
    pub fn requires_credentials(&self) -> bool {
        self.credential_env.is_some()
    }

    pub fn profile(&self) -> ProviderProfile {
        ProviderProfile::new(self.name, self.kind)
            .pricing(self.pricing)
            .timeout(self.timeout)
    }
}

const VENDORS: [VendorProfile; 4] = [
    VendorProfile {
        name: "gemini",
        kind: ProviderKind::ImageConditioned,
        pricing: PricingModel::PerImage {
            input_usd: 0.30,
            output_usd: 0.039,
        },
        timeout: Duration::from_secs(90),
        credential_env: Some("GEMINI_API_KEY"),
    },
    VendorProfile {
        name: "openai",
        kind: ProviderKind::TextToImage,
        pricing: PricingModel::PerImage {
            input_usd: 0.0,
            output_usd: 0.040,
        },
        timeout: Duration::from_secs(90),
        credential_env: Some("OPENAI_API_KEY"),
    },
    VendorProfile {
        name: "stability",
        kind: ProviderKind::TextToImage,
        pricing: PricingModel::Free,
        timeout: Duration::from_secs(90),
        credential_env: Some("STABILITY_API_KEY"),
    },
    VendorProfile {
        name: "comfyui",
        kind: ProviderKind::ImageConditioned,
        pricing: PricingModel::Free,
        timeout: Duration::from_secs(120),
        credential_env: None,
    },
];

/// Vendors in registration order; this order is also the wildcard fan-out order.
pub fn vendor_profiles() -> &'static [VendorProfile] {
    &VENDORS
}
