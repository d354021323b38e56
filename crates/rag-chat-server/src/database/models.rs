use serde::Serialize;
use sqlx::FromRow;

use crate::services::conversation::Passage;

/// One similarity-search hit from the passage collection
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PassageRow {
    pub content: String,
    pub source: Option<String>,
    pub similarity: f64,
}

impl From<PassageRow> for Passage {
    fn from(row: PassageRow) -> Self {
        Passage {
            text: row.content,
            score: row.similarity as f32,
            source: row.source,
        }
    }
}
