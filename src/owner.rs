use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an image owner across all entity kinds sharing the queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerKey {
    pub owner_type: String,
    pub owner_id: i64,
}

impl OwnerKey {
    pub fn new(owner_type: impl Into<String>, owner_id: i64) -> Self {
        OwnerKey {
            owner_type: owner_type.into(),
            owner_id,
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner_type, self.owner_id)
    }
}

/// Crop geometry as submitted with a write. Values keep the caller's string
/// form; numeric input is stringified on assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CropFields {
    pub crop_x: Option<String>,
    pub crop_y: Option<String>,
    pub crop_w: Option<String>,
    pub crop_h: Option<String>,
}

impl CropFields {
    pub fn new(
        crop_x: impl ToString,
        crop_y: impl ToString,
        crop_w: impl ToString,
        crop_h: impl ToString,
    ) -> Self {
        CropFields {
            crop_x: Some(crop_x.to_string()),
            crop_y: Some(crop_y.to_string()),
            crop_w: Some(crop_w.to_string()),
            crop_h: Some(crop_h.to_string()),
        }
    }
}

/// State of an image owner as seen by the host at one side of a write.
///
/// The host supplies one snapshot from before the write (or none for a
/// first save) and one from after it.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSnapshot {
    pub key: OwnerKey,
    /// Any marker that moves whenever the image bytes change.
    pub img_updated_at: Option<DateTime<Utc>>,
    pub online_processing: bool,
    pub crop: CropFields,
}

impl OwnerSnapshot {
    pub fn new(key: OwnerKey) -> Self {
        OwnerSnapshot {
            key,
            img_updated_at: None,
            online_processing: false,
            crop: CropFields::default(),
        }
    }

    pub fn with_image(mut self, updated_at: DateTime<Utc>) -> Self {
        self.img_updated_at = Some(updated_at);
        self
    }

    pub fn online(mut self, online_processing: bool) -> Self {
        self.online_processing = online_processing;
        self
    }

    pub fn with_crop(mut self, crop: CropFields) -> Self {
        self.crop = crop;
        self
    }
}
