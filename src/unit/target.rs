use crate::config::TargetConfig;
use crate::unit::discovery::narrator_ids_from_book_log;
use crate::unit::UnitKey;
use crate::HarvestError;
use std::collections::BTreeSet;
use std::fmt;

/// A unit paired with the page address the proxy should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub key: UnitKey,
    pub target_url: String,
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// The set of units an operator asked for
///
/// Either an inclusive page range of one book or an identity set of narrators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestTarget {
    Book {
        book_id: u64,
        start_page: u64,
        end_page: u64,
        base_url: String,
    },
    Narrators {
        ids: BTreeSet<String>,
        base_url: String,
    },
}

impl HarvestTarget {
    /// Builds the target from configuration
    ///
    /// For narrator targets, identities listed explicitly are merged with
    /// those discovered in the success lines of `source-log`.
    pub fn from_config(config: &TargetConfig) -> Result<Self, HarvestError> {
        match config {
            TargetConfig::Book {
                book_id,
                start_page,
                end_page,
                base_url,
            } => Ok(Self::Book {
                book_id: *book_id,
                start_page: *start_page,
                end_page: *end_page,
                base_url: base_url.trim_end_matches('/').to_string(),
            }),
            TargetConfig::Narrators {
                base_url,
                ids,
                source_log,
            } => {
                let mut all: BTreeSet<String> = ids
                    .iter()
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect();

                if let Some(path) = source_log {
                    let discovered = narrator_ids_from_book_log(path)?;
                    tracing::info!(
                        "Discovered {} narrator ids in {}",
                        discovered.len(),
                        path.display()
                    );
                    all.extend(discovered);
                }

                Ok(Self::Narrators {
                    ids: all,
                    base_url: base_url.trim_end_matches('/').to_string(),
                })
            }
        }
    }

    /// All requested keys in schedule order
    pub fn requested_keys(&self) -> Vec<UnitKey> {
        match self {
            Self::Book {
                book_id,
                start_page,
                end_page,
                ..
            } => (*start_page..=*end_page)
                .map(|page| UnitKey::page(*book_id, page))
                .collect(),
            Self::Narrators { ids, .. } => {
                let mut keys: Vec<UnitKey> = ids.iter().map(UnitKey::narrator).collect();
                keys.sort();
                keys
            }
        }
    }

    /// Number of requested units
    pub fn len(&self) -> usize {
        match self {
            Self::Book {
                start_page,
                end_page,
                ..
            } => end_page
                .checked_sub(*start_page)
                .map_or(0, |span| span as usize + 1),
            Self::Narrators { ids, .. } => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a key from the checkpoint log belongs to this target's namespace
    ///
    /// Repair phases use this rather than the requested range, so failures
    /// recorded under an earlier, wider range are still repaired.
    pub fn owns(&self, key: &UnitKey) -> bool {
        match (self, key) {
            (Self::Book { book_id, .. }, UnitKey::Page { book_id: other, .. }) => book_id == other,
            (Self::Narrators { .. }, UnitKey::Narrator { .. }) => true,
            _ => false,
        }
    }

    /// Derives the target address for a key
    pub fn work_unit(&self, key: UnitKey) -> WorkUnit {
        let base_url = match self {
            Self::Book { base_url, .. } | Self::Narrators { base_url, .. } => base_url,
        };
        let target_url = match &key {
            UnitKey::Page {
                book_id,
                page_number,
            } => format!("{}/book/{}/{}", base_url, book_id, page_number),
            UnitKey::Narrator { narrator_id } => format!("{}/narrator/{}", base_url, narrator_id),
        };
        WorkUnit { key, target_url }
    }

    /// Human-readable description used in logs and the failure report
    pub fn scope(&self) -> String {
        match self {
            Self::Book {
                book_id,
                start_page,
                end_page,
                ..
            } => format!("book {} pages {}-{}", book_id, start_page, end_page),
            Self::Narrators { ids, .. } => format!("{} narrators", ids.len()),
        }
    }
}
