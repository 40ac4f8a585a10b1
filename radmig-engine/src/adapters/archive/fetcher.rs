//! Media payloads read from an extracted archive

use async_trait::async_trait;
use radmig_common::Result;
use std::path::{Path, PathBuf};

use crate::adapters::{MediaFetcher, PayloadReader};
use crate::models::StagedMediaItem;
use crate::services::archive_extractor::safe_join;

/// Serves item locators as paths relative to an extraction root
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MediaFetcher for DirectoryFetcher {
    async fn fetch(&self, item: &StagedMediaItem) -> Result<PayloadReader> {
        let path = safe_join(&self.root, Path::new(&item.locator))?;
        let file = tokio::fs::File::open(&path).await?;
        Ok(Box::new(file))
    }

    async fn fetch_artwork(&self, item: &StagedMediaItem) -> Result<Option<Vec<u8>>> {
        let Some(locator) = &item.artwork_locator else {
            return Ok(None);
        };
        let path = safe_join(&self.root, Path::new(locator))?;
        Ok(Some(tokio::fs::read(&path).await?))
    }
}
