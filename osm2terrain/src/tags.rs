use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// OSM key/value pairs for one element. Copied by value when a path or spline snapshots them;
/// treated as immutable afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Tags {
        Tags(BTreeMap::new())
    }

    pub fn get(&self, k: &str) -> Option<&String> {
        self.0.get(k)
    }

    pub fn contains_key(&self, k: &str) -> bool {
        self.0.contains_key(k)
    }

    pub fn is(&self, k: &str, v: &str) -> bool {
        self.0.get(k).map(|x| x == v).unwrap_or(false)
    }

    pub fn is_any(&self, k: &str, values: Vec<&str>) -> bool {
        if let Some(v) = self.0.get(k) {
            values.contains(&v.as_ref())
        } else {
            false
        }
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, k: K, v: V) {
        self.0.insert(k.into(), v.into());
    }

    pub fn inner(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Tags(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        let mut tags = Tags::new();
        tags.insert("highway", "primary");
        tags.insert("oneway", "yes");
        assert!(tags.is("highway", "primary"));
        assert!(!tags.is("highway", "secondary"));
        assert!(tags.is_any("oneway", vec!["yes", "true", "1"]));
        assert!(!tags.is_any("junction", vec!["roundabout"]));
        assert_eq!(tags.get("highway").map(|x| x.as_str()), Some("primary"));
    }
}
