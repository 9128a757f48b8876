//! Entry lookups over an [`ArchiveIndex`].
//!
//! Every lookup returns entries in central directory order, whatever the
//! order of the query.

use regex::Regex;
use std::collections::HashSet;

use crate::error::{Error, Result};

use super::parser::ArchiveIndex;
use super::structures::Entry;

impl ArchiveIndex {
    /// The full entry sequence, directories included.
    pub fn all_entries(&self) -> &[Entry] {
        self.entries()
    }

    /// Entries whose name is one of `names`.
    ///
    /// Names without a match are left out; comparing the number of results
    /// against the query is up to the caller.
    pub fn exact_match<S: AsRef<str>>(&self, names: &[S]) -> Vec<&Entry> {
        self.select(names, None)
    }

    /// Entries whose name matches `pattern` anywhere (anchor it for a full match).
    pub fn pattern_match(&self, pattern: &Regex) -> Vec<&Entry> {
        self.entries()
            .iter()
            .filter(|e| pattern.is_match(&e.name))
            .collect()
    }

    /// Entries named in `names` or matching `pattern`, each listed once.
    pub fn select<S: AsRef<str>>(&self, names: &[S], pattern: Option<&Regex>) -> Vec<&Entry> {
        let wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        self.entries()
            .iter()
            .filter(|e| {
                wanted.contains(e.name.as_str()) || pattern.is_some_and(|re| re.is_match(&e.name))
            })
            .collect()
    }

    /// The first entry called `name`.
    pub fn find(&self, name: &str) -> Result<&Entry> {
        self.entries()
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::NotFound(format!("no entry named {name}")))
    }
}

/// Requested names missing from `found`, in query order.
pub fn missing_names<'a, S: AsRef<str>>(requested: &'a [S], found: &[&Entry]) -> Vec<&'a str> {
    let present: HashSet<&str> = found.iter().map(|e| e.name.as_str()).collect();
    requested
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !present.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::CompressionMethod;

    fn entry(name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            compressed_size: 0,
            uncompressed_size: 0,
            compression_method: CompressionMethod::Stored,
            crc32: 0,
            local_header_offset: 0,
            is_directory: name.ends_with('/'),
            flags: 0,
            last_mod_time: 0,
            last_mod_date: 0,
        }
    }

    #[test]
    fn missing_names_keeps_query_order() {
        let a = entry("a.txt");
        let found = vec![&a];
        assert_eq!(
            missing_names(&["z.txt", "a.txt", "b.txt"], &found),
            ["z.txt", "b.txt"]
        );
        assert!(missing_names::<&str>(&[], &found).is_empty());
    }
}
