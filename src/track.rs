use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::class::ObjectClass;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Tracked,
    Lost,
    Removed,
}

/// Confirmed track as reported for one frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: u64,
    pub bbox: BBox<Ltrb>,
    pub confidence: f32,
    pub class_id: i32,
    pub class_name: String,
    pub age: u32,
    pub hits: u32,

    // oldest first, at most 10 entries
    pub history: Vec<BBox<Ltrb>>,
}

impl Track {
    #[inline]
    pub fn class(&self) -> ObjectClass {
        ObjectClass::resolve(&self.class_name, self.class_id)
    }
}
