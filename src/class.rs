use serde_derive::{Deserialize, Serialize};

/// Object classes the monitor knows how to label. Anything else falls back
/// to [`ObjectClass::Other`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
    Person,
    Other,
}

struct ClassStyle {
    class: ObjectClass,
    name: &'static str,
    coco_id: i32,
    // RGB
    color: [u8; 3],
}

static STYLES: [ClassStyle; 6] = [
    ClassStyle {
        class: ObjectClass::Car,
        name: "car",
        coco_id: 2,
        color: [0, 255, 0],
    },
    ClassStyle {
        class: ObjectClass::Motorcycle,
        name: "motorcycle",
        coco_id: 3,
        color: [0, 0, 255],
    },
    ClassStyle {
        class: ObjectClass::Bus,
        name: "bus",
        coco_id: 5,
        color: [255, 0, 0],
    },
    ClassStyle {
        class: ObjectClass::Truck,
        name: "truck",
        coco_id: 7,
        color: [255, 165, 0],
    },
    ClassStyle {
        class: ObjectClass::Person,
        name: "person",
        coco_id: 0,
        color: [255, 0, 255],
    },
    ClassStyle {
        class: ObjectClass::Other,
        name: "other",
        coco_id: -1,
        color: [255, 255, 255],
    },
];

/// Highlight for tracks over the speed threshold.
pub const SPEEDING_COLOR: [u8; 3] = [255, 0, 0];

impl ObjectClass {
    pub fn from_name(name: &str) -> Self {
        STYLES
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.class)
            .unwrap_or(ObjectClass::Other)
    }

    pub fn from_coco_id(id: i32) -> Self {
        STYLES
            .iter()
            .find(|s| s.coco_id >= 0 && s.coco_id == id)
            .map(|s| s.class)
            .unwrap_or(ObjectClass::Other)
    }

    /// Name first. Detectors that send an empty or unfamiliar name are
    /// resolved by their COCO class id.
    pub fn resolve(name: &str, class_id: i32) -> Self {
        match Self::from_name(name) {
            ObjectClass::Other => Self::from_coco_id(class_id),
            class => class,
        }
    }

    #[inline]
    fn style(self) -> &'static ClassStyle {
        // STYLES is indexed in declaration order
        &STYLES[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.style().name
    }

    #[inline]
    pub fn color(self) -> [u8; 3] {
        self.style().color
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_declaration_order() {
        for (idx, style) in STYLES.iter().enumerate() {
            assert_eq!(style.class as usize, idx);
        }
    }

    #[test]
    fn known_names_resolve() {
        assert_eq!(ObjectClass::from_name("car"), ObjectClass::Car);
        assert_eq!(ObjectClass::from_name("Truck"), ObjectClass::Truck);
        assert_eq!(ObjectClass::from_coco_id(3), ObjectClass::Motorcycle);
        assert_eq!(ObjectClass::Bus.color(), [255, 0, 0]);
    }

    #[test]
    fn unknown_names_fall_back() {
        assert_eq!(ObjectClass::from_name("bicycle"), ObjectClass::Other);
        assert_eq!(ObjectClass::from_coco_id(1), ObjectClass::Other);
        assert_eq!(ObjectClass::from_coco_id(-1), ObjectClass::Other);
        assert_eq!(ObjectClass::from_name("zebra").color(), [255, 255, 255]);
    }

    #[test]
    fn unfamiliar_names_resolve_by_coco_id() {
        assert_eq!(ObjectClass::resolve("truck", 2), ObjectClass::Truck);
        assert_eq!(ObjectClass::resolve("", 2), ObjectClass::Car);
        assert_eq!(ObjectClass::resolve("vehicle", 7), ObjectClass::Truck);
        assert_eq!(ObjectClass::resolve("vehicle", 99), ObjectClass::Other);
        assert_eq!(ObjectClass::resolve("", 5).name(), "bus");
    }
}
