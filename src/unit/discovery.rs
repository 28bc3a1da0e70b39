//! Narrator identity discovery from a book checkpoint log
//!
//! Only success lines are read; failure lines and repeated attempts for the
//! same page are tolerated and contribute nothing.

use crate::checkpoint::{read_success_lines, CheckpointResult};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Collects every narrator id linked from successfully harvested book pages
pub fn narrator_ids_from_book_log(path: &Path) -> CheckpointResult<BTreeSet<String>> {
    let mut ids = BTreeSet::new();

    for line in read_success_lines(path)? {
        let blocks = line
            .get("hadith_blocks")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for block in blocks {
            let narrators = block
                .get("narrators")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for narrator in narrators {
                let id = match narrator.get("id") {
                    Some(Value::String(s)) => s.trim().to_string(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => continue,
                };
                if !id.is_empty() {
                    ids.insert(id);
                }
            }
        }
    }

    Ok(ids)
}
