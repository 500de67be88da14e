//! View models assembled by the repository.
//!
//! Keep these structs focused on the data returned by queries. Transition
//! rules live in `timeline`; SQL lives in `repo`.

use crate::model::{Batch, MediaAttachment, TimelineStep};
use serde::Serialize;

/// A batch together with its ordered timeline and media, as served to the
/// detail view.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub batch: Batch,
    pub timeline: Vec<TimelineStep>,
    pub media: Vec<MediaAttachment>,
}
