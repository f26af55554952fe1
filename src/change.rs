//! Decides whether a persisted write needs variant regeneration.

use crate::descriptor::CropGeometry;
use crate::owner::{CropFields, OwnerSnapshot};

/// Outcome of comparing the two sides of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    ImageChanged { crop: Option<CropGeometry> },
}

impl Change {
    pub fn should_enqueue(&self) -> bool {
        matches!(self, Change::ImageChanged { .. })
    }

    pub fn crop(&self) -> Option<&CropGeometry> {
        match self {
            Change::ImageChanged { crop } => crop.as_ref(),
            Change::Unchanged => None,
        }
    }
}

/// Compares the image marker across a write. `before` is `None` for a first
/// save; that only qualifies when the new state actually carries an image.
/// Removing the image (marker present before, absent after) is `Unchanged`:
/// there is nothing left to generate variants from.
pub fn detect(before: Option<&OwnerSnapshot>, after: &OwnerSnapshot) -> Change {
    let previous = before.and_then(|snapshot| snapshot.img_updated_at);
    if after.img_updated_at.is_none() || after.img_updated_at == previous {
        return Change::Unchanged;
    }

    Change::ImageChanged {
        crop: crop_geometry(&after.crop),
    }
}

/// All four fields present and non-blank, or nothing.
pub fn crop_geometry(fields: &CropFields) -> Option<CropGeometry> {
    fn filled(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(str::to_owned)
    }

    Some(CropGeometry {
        crop_x: filled(&fields.crop_x)?,
        crop_y: filled(&fields.crop_y)?,
        crop_w: filled(&fields.crop_w)?,
        crop_h: filled(&fields.crop_h)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::OwnerKey;
    use chrono::{Duration, TimeZone, Utc};

    fn snapshot() -> OwnerSnapshot {
        OwnerSnapshot::new(OwnerKey::new("DelayedImage", 1))
    }

    #[test]
    fn first_save_with_image_qualifies() {
        let after = snapshot().with_image(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        assert_eq!(detect(None, &after), Change::ImageChanged { crop: None });
    }

    #[test]
    fn save_without_image_is_ignored() {
        assert_eq!(detect(None, &snapshot()), Change::Unchanged);
    }

    #[test]
    fn untouched_marker_is_ignored_on_update() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let before = snapshot().with_image(at);
        let after = before.clone().online(true);

        assert_eq!(detect(Some(&before), &after), Change::Unchanged);
    }

    #[test]
    fn advanced_marker_qualifies_on_update() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let before = snapshot().with_image(at);
        let after = snapshot().with_image(at + Duration::days(1));

        assert!(detect(Some(&before), &after).should_enqueue());
    }

    #[test]
    fn removing_image_is_unchanged() {
        let before = snapshot()
            .with_image(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .with_crop(CropFields::new(0, 10, 100, 100));
        let mut after = before.clone();
        after.img_updated_at = None;

        assert_eq!(detect(Some(&before), &after), Change::Unchanged);
    }

    #[test]
    fn numeric_crop_is_kept_as_strings() {
        let crop = crop_geometry(&CropFields::new(0, 10, 100, 100)).unwrap();

        assert_eq!(crop.crop_x, "0");
        assert_eq!(crop.crop_y, "10");
        assert_eq!(crop.crop_w, "100");
        assert_eq!(crop.crop_h, "100");
    }

    #[test]
    fn partial_crop_is_dropped() {
        let mut fields = CropFields::new("0", "10", "100", "100");
        fields.crop_h = None;
        assert_eq!(crop_geometry(&fields), None);

        let mut fields = CropFields::new("0", "10", "100", "100");
        fields.crop_w = Some("  ".into());
        assert_eq!(crop_geometry(&fields), None);
    }
}
