//! Static text resources from configuration

use crate::config::ResourceConfig;
use crate::protocol::{Resource, ResourceContents};
use crate::{Error, Result};

/// Resources served by `resources/list` and `resources/read`
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    entries: Vec<ResourceConfig>,
}

impl ResourceCatalog {
    /// Catalog of the configured resources
    #[must_use]
    pub fn from_config(resources: &[ResourceConfig]) -> Self {
        Self {
            entries: resources.to_vec(),
        }
    }

    /// Resource listing
    #[must_use]
    pub fn list(&self) -> Vec<Resource> {
        self.entries
            .iter()
            .map(|r| Resource {
                uri: r.uri.clone(),
                name: r.name.clone(),
                description: r.description.clone(),
                mime_type: r.mime_type.clone(),
            })
            .collect()
    }

    /// Contents of `uri`
    ///
    /// # Errors
    ///
    /// [`Error::UnknownResource`] if no resource has that URI.
    pub fn read(&self, uri: &str) -> Result<ResourceContents> {
        self.entries
            .iter()
            .find(|r| r.uri == uri)
            .map(|r| ResourceContents {
                uri: r.uri.clone(),
                name: r.name.clone(),
                mime_type: r.mime_type.clone(),
                text: r.text.clone(),
            })
            .ok_or_else(|| Error::UnknownResource(uri.to_string()))
    }
}
