use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// Namespaced identity of one work unit
///
/// A book page is keyed by collection and sequence number; a narrator profile
/// by its standalone identity. Keys are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitKey {
    /// One page of a paginated book
    Page { book_id: u64, page_number: u64 },

    /// One narrator profile
    Narrator { narrator_id: String },
}

impl UnitKey {
    pub fn page(book_id: u64, page_number: u64) -> Self {
        Self::Page {
            book_id,
            page_number,
        }
    }

    pub fn narrator(narrator_id: impl Into<String>) -> Self {
        Self::Narrator {
            narrator_id: narrator_id.into(),
        }
    }

    /// Identity fields as they appear on a checkpoint line
    pub fn identity_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            Self::Page {
                book_id,
                page_number,
            } => {
                fields.insert("book_id".to_string(), Value::from(*book_id));
                fields.insert("page_number".to_string(), Value::from(*page_number));
            }
            Self::Narrator { narrator_id } => {
                fields.insert("narrator_id".to_string(), Value::from(narrator_id.as_str()));
            }
        }
        fields
    }

    /// Rebuilds a key from the identity fields of a checkpoint line
    ///
    /// Returns None if the line carries neither a page nor a narrator identity.
    pub fn from_identity_fields(obj: &Map<String, Value>) -> Option<Self> {
        if let (Some(book_id), Some(page_number)) = (
            obj.get("book_id").and_then(Value::as_u64),
            obj.get("page_number").and_then(Value::as_u64),
        ) {
            return Some(Self::page(book_id, page_number));
        }

        match obj.get("narrator_id")? {
            Value::String(id) if !id.trim().is_empty() => Some(Self::narrator(id.trim())),
            Value::Number(n) => Some(Self::narrator(n.to_string())),
            _ => None,
        }
    }

    /// Short identifier used in reports (`1681/10`, `4242`)
    pub fn unit_id(&self) -> String {
        match self {
            Self::Page {
                book_id,
                page_number,
            } => format!("{}/{}", book_id, page_number),
            Self::Narrator { narrator_id } => narrator_id.clone(),
        }
    }

    /// File-name-safe stem for diagnostic snippets
    pub fn file_stem(&self) -> String {
        match self {
            Self::Page { page_number, .. } => format!("page_{}", page_number),
            Self::Narrator { narrator_id } => {
                let safe: String = narrator_id
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect();
                format!("narrator_{}", safe)
            }
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page {
                book_id,
                page_number,
            } => write!(f, "book {} page {}", book_id, page_number),
            Self::Narrator { narrator_id } => write!(f, "narrator {}", narrator_id),
        }
    }
}

// Numeric identities sort numerically, everything else after them lexically
fn narrator_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl Ord for UnitKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Self::Page {
                    book_id: a_book,
                    page_number: a_page,
                },
                Self::Page {
                    book_id: b_book,
                    page_number: b_page,
                },
            ) => a_book.cmp(b_book).then(a_page.cmp(b_page)),
            (Self::Narrator { narrator_id: a }, Self::Narrator { narrator_id: b }) => {
                narrator_order(a, b).then_with(|| a.cmp(b))
            }
            (Self::Page { .. }, Self::Narrator { .. }) => Ordering::Less,
            (Self::Narrator { .. }, Self::Page { .. }) => Ordering::Greater,
        }
    }
}

impl PartialOrd for UnitKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_fields_roundtrip() {
        for key in [UnitKey::page(1681, 10), UnitKey::narrator("4242")] {
            let fields = key.identity_fields();
            assert_eq!(UnitKey::from_identity_fields(&fields), Some(key));
        }
    }

    #[test]
    fn test_numeric_narrator_id_accepted() {
        let obj = json!({"status": "failed", "narrator_id": 17});
        let key = UnitKey::from_identity_fields(obj.as_object().unwrap());
        assert_eq!(key, Some(UnitKey::narrator("17")));
    }

    #[test]
    fn test_line_without_identity() {
        let obj = json!({"status": "success", "url": "https://example.com"});
        assert_eq!(UnitKey::from_identity_fields(obj.as_object().unwrap()), None);
    }

    #[test]
    fn test_narrator_ordering_is_numeric_first() {
        let mut keys = vec![
            UnitKey::narrator("x1"),
            UnitKey::narrator("100"),
            UnitKey::narrator("9"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                UnitKey::narrator("9"),
                UnitKey::narrator("100"),
                UnitKey::narrator("x1"),
            ]
        );
    }

    #[test]
    fn test_page_ordering() {
        assert!(UnitKey::page(1, 2) < UnitKey::page(1, 10));
        assert!(UnitKey::page(1, 99) < UnitKey::page(2, 1));
    }

    #[test]
    fn test_file_stem_is_safe() {
        assert_eq!(UnitKey::page(1681, 12).file_stem(), "page_12");
        assert_eq!(UnitKey::narrator("a/b").file_stem(), "narrator_a_b");
    }

    #[test]
    fn test_unit_id() {
        assert_eq!(UnitKey::page(1681, 12).unit_id(), "1681/12");
        assert_eq!(UnitKey::narrator("55").unit_id(), "55");
    }
}
