use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ConfigError;

/// Guest operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Ubuntu,
    Windows,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Ubuntu => "ubuntu",
            OsType::Windows => "windows",
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, OsType::Windows)
    }

    /// Marketplace image used when a deployment does not name one
    pub fn default_image(&self) -> ImageConfig {
        match self {
            OsType::Ubuntu => ImageConfig::Marketplace(MarketplaceImage {
                publisher: "Canonical".to_string(),
                offer: "0001-com-ubuntu-server-jammy".to_string(),
                sku: "22_04-lts-gen2".to_string(),
                version: "latest".to_string(),
            }),
            OsType::Windows => ImageConfig::Marketplace(MarketplaceImage {
                publisher: "MicrosoftWindowsServer".to_string(),
                offer: "WindowsServer".to_string(),
                sku: "2022-datacenter-azure-edition".to_string(),
                version: "latest".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceImage {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

/// VM image: a marketplace reference or a custom image/disk resource id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawImageConfig", into = "RawImageConfig")]
pub enum ImageConfig {
    Marketplace(MarketplaceImage),
    Custom { id: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ImageConfig {
    /// Build an image from optional parts. Exactly one of the full
    /// publisher/offer/sku triple and `id` must be given; `version` defaults
    /// to `latest` and only applies to marketplace images.
    pub fn new(
        publisher: Option<String>,
        offer: Option<String>,
        sku: Option<String>,
        version: Option<String>,
        id: Option<String>,
    ) -> Result<Self, ConfigError> {
        let publisher = present(publisher);
        let offer = present(offer);
        let sku = present(sku);
        let id = present(id);
        let any_marketplace = publisher.is_some() || offer.is_some() || sku.is_some();

        match (publisher, offer, sku, id) {
            (Some(publisher), Some(offer), Some(sku), None) => {
                Ok(ImageConfig::Marketplace(MarketplaceImage {
                    publisher,
                    offer,
                    sku,
                    version: present(version).unwrap_or_else(|| "latest".to_string()),
                }))
            }
            (None, None, None, Some(id)) => Ok(ImageConfig::Custom { id }),
            (_, _, _, Some(_)) if any_marketplace => Err(ConfigError::InvalidImage(
                "give either a marketplace image or a custom image id, not both".to_string(),
            )),
            (_, _, _, None) if any_marketplace => Err(ConfigError::InvalidImage(
                "marketplace image needs publisher, offer and sku".to_string(),
            )),
            _ => Err(ConfigError::InvalidImage(
                "no marketplace image or custom image id given".to_string(),
            )),
        }
    }

    pub fn marketplace(
        publisher: impl Into<String>,
        offer: impl Into<String>,
        sku: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::new(
            Some(publisher.into()),
            Some(offer.into()),
            Some(sku.into()),
            None,
            None,
        )
    }

    pub fn custom(id: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(None, None, None, None, Some(id.into()))
    }

    /// `imageReference` object for the VM's storage profile
    pub fn image_reference(&self) -> serde_json::Value {
        match self {
            ImageConfig::Marketplace(img) => json!({
                "publisher": img.publisher,
                "offer": img.offer,
                "sku": img.sku,
                "version": img.version,
            }),
            ImageConfig::Custom { id } => json!({ "id": id }),
        }
    }

    /// Short human-readable form, e.g. `Canonical:ubuntu:22_04:latest`
    pub fn display_name(&self) -> String {
        match self {
            ImageConfig::Marketplace(img) => {
                format!("{}:{}:{}:{}", img.publisher, img.offer, img.sku, img.version)
            }
            ImageConfig::Custom { id } => id.clone(),
        }
    }
}

impl TryFrom<RawImageConfig> for ImageConfig {
    type Error = ConfigError;

    fn try_from(raw: RawImageConfig) -> Result<Self, Self::Error> {
        ImageConfig::new(raw.publisher, raw.offer, raw.sku, raw.version, raw.id)
    }
}

impl From<ImageConfig> for RawImageConfig {
    fn from(image: ImageConfig) -> Self {
        match image {
            ImageConfig::Marketplace(img) => RawImageConfig {
                publisher: Some(img.publisher),
                offer: Some(img.offer),
                sku: Some(img.sku),
                version: Some(img.version),
                id: None,
            },
            ImageConfig::Custom { id } => RawImageConfig {
                id: Some(id),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marketplace_image() {
        let image = ImageConfig::marketplace("Canonical", "ubuntu-24_04-lts", "server").unwrap();
        let reference = image.image_reference();
        assert_eq!(reference["publisher"], "Canonical");
        assert_eq!(reference["version"], "latest");
        assert!(reference.get("id").is_none());
    }

    #[test]
    fn test_custom_image() {
        let id = "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/images/golden";
        let image = ImageConfig::custom(id).unwrap();
        assert_eq!(image.image_reference(), json!({ "id": id }));
    }

    #[test]
    fn test_partial_marketplace_rejected() {
        let result = ImageConfig::new(
            Some("Canonical".to_string()),
            Some("offer".to_string()),
            None,
            None,
            None,
        );
        assert!(matches!(result, Err(ConfigError::InvalidImage(_))));
    }

    #[test]
    fn test_both_variants_rejected() {
        let result = ImageConfig::new(
            Some("Canonical".to_string()),
            Some("offer".to_string()),
            Some("sku".to_string()),
            None,
            Some("/subscriptions/s/images/x".to_string()),
        );
        assert!(matches!(result, Err(ConfigError::InvalidImage(_))));
    }

    #[test]
    fn test_nothing_given_rejected() {
        let result = ImageConfig::new(None, None, None, Some("1.0".to_string()), None);
        assert!(matches!(result, Err(ConfigError::InvalidImage(_))));
    }

    #[test]
    fn test_parse_image() {
        let image: ImageConfig = serde_json::from_str(
            r#"{"publisher": "p", "offer": "o", "sku": "s", "version": "1.2.3"}"#,
        )
        .unwrap();
        assert_eq!(image.display_name(), "p:o:s:1.2.3");

        let bad: Result<ImageConfig, _> = serde_json::from_str(r#"{"offer": "o"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_default_images() {
        assert!(matches!(
            OsType::Ubuntu.default_image(),
            ImageConfig::Marketplace(ref img) if img.publisher == "Canonical"
        ));
        assert!(OsType::Windows.is_windows());
    }
}
