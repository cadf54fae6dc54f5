use serde::Serialize;
use std::fmt::Display;

/// Ordered name/value pairs describing a component's runtime state. This is
/// the only externally observable introspection surface the core defines;
/// monitoring code renders it as-is, so insertion order is preserved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    entries: Vec<(String, String)>,
}

impl StatusReport {
    pub fn new() -> Self {
        StatusReport::default()
    }

    /// Sets a value, replacing an existing entry with the same name in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Display) -> &mut Self {
        let name = name.into();
        let value = value.to_string();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order_and_replaces_in_place() {
        let mut status = StatusReport::new();
        status.set("storeSize", 3).set("maxSize", 100).set("eventCount", 12);
        status.set("storeSize", 4);

        let names: Vec<&str> = status.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["storeSize", "maxSize", "eventCount"]);
        assert_eq!(status.get("storeSize"), Some("4"));
        assert_eq!(status.get("missing"), None);
    }
}
