//! Class-id to label mapping.
//!
//! Label maps use the object-detection `.pbtxt` layout:
//!
//! ```text
//! item {
//!   id: 1
//!   name: 'crash'
//!   display_name: 'Vehicle Crash'
//! }
//! ```
//!
//! `display_name` wins over `name` when both are present.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Label reported for class ids missing from the map.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Clone, Debug, Default)]
pub struct LabelMap {
    names: HashMap<i64, String>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: i64, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label map {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid label map {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        static ITEM_RE: OnceLock<regex::Regex> = OnceLock::new();
        static FIELD_RE: OnceLock<regex::Regex> = OnceLock::new();
        let item_re = ITEM_RE.get_or_init(|| regex::Regex::new(r"item\s*\{([^}]*)\}").unwrap());
        let field_re = FIELD_RE.get_or_init(|| {
            regex::Regex::new(r#"(\w+)\s*:\s*(?:'([^']*)'|"([^"]*)"|(-?\d+))"#).unwrap()
        });

        let mut map = Self::new();
        for item in item_re.captures_iter(raw) {
            let mut id = None;
            let mut name = None;
            let mut display_name = None;
            for field in field_re.captures_iter(&item[1]) {
                let text = field
                    .get(2)
                    .or_else(|| field.get(3))
                    .map(|m| m.as_str().to_string());
                match &field[1] {
                    "id" => {
                        let value = field
                            .get(4)
                            .ok_or_else(|| anyhow!("label map id must be an integer"))?;
                        id = Some(value.as_str().parse::<i64>()?);
                    }
                    "name" => name = text,
                    "display_name" => display_name = text,
                    _ => {}
                }
            }
            let id = id.ok_or_else(|| anyhow!("label map item without id"))?;
            let label = display_name
                .or(name)
                .ok_or_else(|| anyhow!("label map item {} has no name", id))?;
            if map.names.insert(id, label).is_some() {
                return Err(anyhow!("label map id {} declared twice", id));
            }
        }
        if map.names.is_empty() {
            return Err(anyhow!("label map has no items"));
        }
        Ok(map)
    }

    /// Label for a class id, or `UNKNOWN_LABEL`.
    pub fn name(&self, id: i64) -> &str {
        self.names.get(&id).map(String::as_str).unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CRASH_MAP: &str = r#"
item {
  id: 1
  name: 'crash'
  display_name: 'Vehicle Crash'
}
item {
  name: "no_crash"
  id: 2
}
"#;

    #[test]
    fn parses_items_preferring_display_name() {
        let map = LabelMap::parse(CRASH_MAP).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.name(1), "Vehicle Crash");
        assert_eq!(map.name(2), "no_crash");
    }

    #[test]
    fn unmapped_ids_are_unknown() {
        let map = LabelMap::parse(CRASH_MAP).unwrap();
        assert_eq!(map.name(42), UNKNOWN_LABEL);
    }

    #[test]
    fn rejects_duplicate_and_nameless_items() {
        assert!(LabelMap::parse("item { id: 1 name: 'a' } item { id: 1 name: 'b' }").is_err());
        assert!(LabelMap::parse("item { id: 3 }").is_err());
        assert!(LabelMap::parse("").is_err());
    }
}
