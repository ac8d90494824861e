//! Case-insensitive header lookup over the ordered raw header pairs.

use std::collections::HashMap;

/// Parsed header map built from an ordered sequence of `(name, value)`
/// byte pairs. Names are matched case-insensitively; values are kept
/// verbatim. Later duplicates overwrite earlier ones, matching how the
/// raw pairs are folded into the map.
#[derive(Debug, Default, Clone)]
pub struct Headers {
    map: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: &[(Vec<u8>, Vec<u8>)]) -> Self {
        let mut map = HashMap::with_capacity(raw.len());
        for (name, value) in raw {
            map.insert(
                String::from_utf8_lossy(name).to_ascii_lowercase(),
                String::from_utf8_lossy(value).into_owned(),
            );
        }
        Self { map }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_lowercase())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.map.insert(name.to_ascii_lowercase(), value.into());
    }
}
