//! Static account inventory

use infraflow_cloud::{CloudError, CloudInventory, ImageQuery, ImageRecord, Result};
use glob::Pattern;
use tracing::debug;

/// Inventory backed by fixed lists of zones and images
#[derive(Debug, Clone)]
pub struct StaticInventory {
    region: String,
    zones: Vec<String>,
    images: Vec<ImageRecord>,
}

impl StaticInventory {
    /// Region with zones `<region>a`, `<region>b`, `<region>c` and a default
    /// Amazon Linux 2023 image
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let zones = ["a", "b", "c"]
            .iter()
            .map(|suffix| format!("{}{}", region, suffix))
            .collect();
        Self {
            region,
            zones,
            images: vec![ImageRecord {
                id: "ami-0c02fb55956c7d316".to_string(),
                name: "al2023-ami-2023.6.20241010.0-kernel-6.1-x86_64".to_string(),
                owner: "amazon".to_string(),
                virtualization_type: "hvm".to_string(),
                creation_date: "2024-10-10T00:00:00.000Z".to_string(),
            }],
        }
    }

    pub fn with_zones(mut self, zones: Vec<String>) -> Self {
        self.zones = zones;
        self
    }

    pub fn with_image(mut self, image: ImageRecord) -> Self {
        self.images.push(image);
        self
    }

    pub fn without_images(mut self) -> Self {
        self.images.clear();
        self
    }
}

impl CloudInventory for StaticInventory {
    fn region(&self) -> &str {
        &self.region
    }

    fn availability_zones(&self) -> Result<Vec<String>> {
        Ok(self.zones.clone())
    }

    fn latest_image(&self, query: &ImageQuery) -> Result<ImageRecord> {
        let pattern = Pattern::new(&query.name_pattern).map_err(|e| {
            CloudError::Inventory(format!("invalid image name pattern {}: {}", query.name_pattern, e))
        })?;

        let image = self
            .images
            .iter()
            .filter(|image| query.owners.is_empty() || query.owners.contains(&image.owner))
            .filter(|image| image.virtualization_type == query.virtualization_type)
            .filter(|image| pattern.matches(&image.name))
            .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
            .cloned()
            .ok_or_else(|| {
                CloudError::Inventory(format!(
                    "no image matches {} (owners: {})",
                    query.name_pattern,
                    query.owners.join(", ")
                ))
            })?;

        debug!(image = %image.id, name = %image.name, "Resolved image");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, name: &str, date: &str) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            name: name.to_string(),
            owner: "amazon".to_string(),
            virtualization_type: "hvm".to_string(),
            creation_date: date.to_string(),
        }
    }

    #[test]
    fn test_latest_matching_image_wins() {
        let inventory = StaticInventory::new("eu-west-1")
            .with_image(image(
                "ami-newer",
                "al2023-ami-2023.7.20250101.0-kernel-6.1-x86_64",
                "2025-01-01T00:00:00.000Z",
            ))
            .with_image(image(
                "ami-arm",
                "al2023-ami-2023.7.20250201.0-kernel-6.1-arm64",
                "2025-02-01T00:00:00.000Z",
            ));

        let found = inventory
            .latest_image(&ImageQuery::amazon_linux_2023())
            .unwrap();
        assert_eq!(found.id, "ami-newer");
        assert_eq!(
            inventory.availability_zones().unwrap(),
            vec!["eu-west-1a", "eu-west-1b", "eu-west-1c"]
        );
    }

    #[test]
    fn test_no_match_is_an_error() {
        let inventory = StaticInventory::new("us-east-1").without_images();
        let err = inventory
            .latest_image(&ImageQuery::amazon_linux_2023())
            .unwrap_err();
        assert!(matches!(err, CloudError::Inventory(_)));
    }
}
