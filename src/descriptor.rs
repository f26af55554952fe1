use crate::owner::OwnerKey;
use serde::{Deserialize, Serialize};

/// Crop override handed to the worker. Only built when all four fields were
/// present and non-blank on the triggering write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropGeometry {
    pub crop_x: String,
    pub crop_y: String,
    pub crop_w: String,
    pub crop_h: String,
}

/// The unit pushed onto a queue. Never mutated once pushed.
///
/// On the wire the override sits under `assign_attributes`; the key is absent
/// entirely when no crop applies, so its presence alone tells the worker to crop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub owner_id: i64,
    pub owner_type: String,
    #[serde(
        rename = "assign_attributes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub crop: Option<CropGeometry>,
}

impl JobDescriptor {
    pub fn new(owner: &OwnerKey, crop: Option<CropGeometry>) -> Self {
        JobDescriptor {
            owner_id: owner.owner_id,
            owner_type: owner.owner_type.clone(),
            crop,
        }
    }

    pub fn owner(&self) -> OwnerKey {
        OwnerKey::new(self.owner_type.clone(), self.owner_id)
    }

    pub fn belongs_to(&self, owner: &OwnerKey) -> bool {
        self.owner_id == owner.owner_id && self.owner_type == owner.owner_type
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
