//! Per-job manifest of created destination entities, used for rollback and redo

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportedItems {
    pub station_ids: Vec<String>,
    pub media_ids: Vec<String>,
    pub playlist_ids: Vec<String>,
    pub smart_block_ids: Vec<String>,
    pub show_ids: Vec<String>,
    pub clock_ids: Vec<String>,
    pub webstream_ids: Vec<String>,
    pub user_ids: Vec<String>,
}

impl ImportedItems {
    pub fn total_count(&self) -> usize {
        self.station_ids.len()
            + self.media_ids.len()
            + self.playlist_ids.len()
            + self.smart_block_ids.len()
            + self.show_ids.len()
            + self.clock_ids.len()
            + self.webstream_ids.len()
            + self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    pub fn merge(&mut self, other: ImportedItems) {
        self.station_ids.extend(other.station_ids);
        self.media_ids.extend(other.media_ids);
        self.playlist_ids.extend(other.playlist_ids);
        self.smart_block_ids.extend(other.smart_block_ids);
        self.show_ids.extend(other.show_ids);
        self.clock_ids.extend(other.clock_ids);
        self.webstream_ids.extend(other.webstream_ids);
        self.user_ids.extend(other.user_ids);
    }
}
