//! Hierarchical `key=value` property trees, as found in the `boards.txt` and
//! `platform.txt` files describing a board toolchain.
//!
//! Keys are dotted paths (`uno.upload.tool`) and values may refer to other
//! keys through `{other.key}` placeholders. A tree is never modified once it
//! has been loaded: [`PropertyTree::to_subtree`] and [`PropertyTree::merge`]
//! hand back new, independent trees.
//!
//! **Example**
//! ```
//! use flasher::PropertyTree;
//!
//! let boards: PropertyTree = "uno.name=Arduino Uno\nuno.upload.tool=avrdude"
//!     .parse()
//!     .unwrap();
//! let uno = boards.to_subtree("uno");
//! assert_eq!(uno.get("upload.tool"), Some("avrdude"));
//! ```

use std::{collections::HashMap, convert::Infallible, fs, path::Path, str::FromStr};

use log::{debug, trace};

use crate::error::{Error, Result};

/// Upper bound on the number of substitution passes done by
/// [`PropertyTree::lookup`]. A value still holding placeholders after that
/// many passes is considered cyclic.
pub const MAX_RESOLUTION_PASSES: usize = 10;

// =============================================================================
// Public Interface
// =============================================================================

/// A flat mapping from dotted keys to raw (unresolved) string values.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PropertyTree {
    properties: HashMap<String, String>,
}

impl PropertyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse the property file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        let tree = Self::parse(&text);
        debug!("Loaded {} properties from {}", tree.len(), path.display());
        Ok(tree)
    }

    /// Parse property file content.
    ///
    /// Blank lines and lines starting with `#` are skipped. Each remaining
    /// line is split at its first `=`; neither side is trimmed. Lines without
    /// a `=` carry no property and are skipped as well.
    pub fn parse(text: &str) -> Self {
        let mut properties = HashMap::new();
        for line in text.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    properties.insert(key.to_owned(), value.to_owned());
                }
                None => trace!("Ignoring line without a delimiter: {:?}", line),
            }
        }
        PropertyTree { properties }
    }

    /// Raw value stored under `key`, placeholders left untouched.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Set the raw value of `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate over the raw entries of the tree, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Select every entry under `prefix` and re-key it with `prefix.`
    /// stripped. An unknown prefix yields an empty tree.
    pub fn to_subtree(&self, prefix: &str) -> Self {
        let head = format!("{}.", prefix);
        let properties = self
            .properties
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(head.as_str())
                    .map(|rest| (rest.to_owned(), value.clone()))
            })
            .collect();
        PropertyTree { properties }
    }

    /// Overlay `overlay` onto a copy of this tree. On key collision the
    /// overlay's value wins.
    pub fn merge(&self, overlay: &PropertyTree) -> Self {
        let mut properties = self.properties.clone();
        properties.extend(
            overlay
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        PropertyTree { properties }
    }

    /// Resolve the value of `key`, expanding `{name}` placeholders.
    ///
    /// Each placeholder is looked up in `context` first, then in this tree.
    /// Names found in neither expand to the empty string, as does a `key`
    /// that is not present at all. Substitution is repeated until no
    /// placeholder is left; if some remain after [`MAX_RESOLUTION_PASSES`]
    /// passes, [`Error::Resolution`] is returned.
    pub fn lookup(&self, key: &str, context: &PropertyTree) -> Result<String> {
        let mut value = self.get(key).unwrap_or_default().to_owned();
        for pass in 0..MAX_RESOLUTION_PASSES {
            if !has_placeholder(&value) {
                return Ok(value);
            }
            value = expand(&value, |name| {
                context
                    .get(name)
                    .or_else(|| self.get(name))
                    .unwrap_or_default()
            });
            trace!("{} (pass {}): {}", key, pass + 1, value);
        }
        if has_placeholder(&value) {
            return Err(Error::Resolution {
                key: key.to_owned(),
                passes: MAX_RESOLUTION_PASSES,
                value,
            });
        }
        Ok(value)
    }

    /// `true` only for the exact values `"true"` and `"1"`.
    pub fn to_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true") | Some("1"))
    }
}

impl FromStr for PropertyTree {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl<K: Into<String>, V: Into<String>> std::iter::FromIterator<(K, V)> for PropertyTree {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        PropertyTree {
            properties: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Locate the next `{name}` placeholder at or after `from`, returning the
/// byte range of the whole placeholder. An opening brace followed by another
/// one before any closing brace is not a placeholder start.
fn next_placeholder(value: &str, from: usize) -> Option<(usize, usize)> {
    let mut start = None;
    for (i, c) in value[from..].char_indices() {
        let at = from + i;
        match c {
            '{' => start = Some(at),
            '}' => {
                if let Some(open) = start {
                    if at > open + 1 {
                        return Some((open, at + 1));
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }
    None
}

fn has_placeholder(value: &str) -> bool {
    next_placeholder(value, 0).is_some()
}

/// One substitution pass over `value`.
fn expand<'a, F>(value: &str, resolve: F) -> String
where
    F: Fn(&str) -> &'a str,
{
    let mut out = String::with_capacity(value.len());
    let mut cursor = 0;
    while let Some((open, close)) = next_placeholder(value, cursor) {
        out.push_str(&value[cursor..open]);
        out.push_str(resolve(&value[open + 1..close - 1]));
        cursor = close;
    }
    out.push_str(&value[cursor..]);
    out
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn tree(entries: &[(&str, &str)]) -> PropertyTree {
        entries.iter().cloned().collect()
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let t = PropertyTree::parse(
            "# a comment\n\
             \n\
             uno.name=Arduino Uno\n   \n\
             uno.upload.tool=avrdude\r\n\
             no delimiter here\n",
        );
        assert_eq!(t.len(), 2);
        assert_eq!(t.get("uno.name"), Some("Arduino Uno"));
        assert_eq!(t.get("uno.upload.tool"), Some("avrdude"));
    }

    #[test]
    fn indented_hash_is_part_of_the_key() {
        let t = PropertyTree::parse("#x=1\n  #x=2\n");
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("  #x"), Some("2"));
    }

    #[test]
    fn parse_splits_at_first_delimiter_without_trimming() {
        let t = PropertyTree::parse("a.b = x=y \n");
        assert_eq!(t.get("a.b "), Some(" x=y "));
        assert_eq!(t.get("a.b"), None);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "uno.upload.tool=avrdude").unwrap();
        let t = PropertyTree::load(file.path()).unwrap();
        assert_eq!(t.get("uno.upload.tool"), Some("avrdude"));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PropertyTree::load(dir.path().join("boards.txt")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn subtree_strips_prefix_once() {
        let t = tree(&[
            ("uno.upload.tool", "avrdude"),
            ("uno.uno.x", "nested"),
            ("unox.y", "other"),
            ("uno", "bare"),
            ("mega.upload.tool", "stk500"),
        ]);
        let s = t.to_subtree("uno");
        assert_eq!(s.len(), 2);
        assert_eq!(s.get("upload.tool"), Some("avrdude"));
        assert_eq!(s.get("uno.x"), Some("nested"));
        assert!(!s.contains_key("y"));
    }

    #[test]
    fn subtree_of_unknown_prefix_is_empty() {
        let t = tree(&[("uno.upload.tool", "avrdude")]);
        assert!(t.to_subtree("leonardo").is_empty());
    }

    #[test]
    fn subtree_is_independent() {
        let t = tree(&[("uno.a", "1")]);
        let mut s = t.to_subtree("uno");
        s.set("a", "2");
        assert_eq!(t.get("uno.a"), Some("1"));
    }

    #[test]
    fn merge_overlay_wins() {
        let base = tree(&[("a", "base"), ("b", "base")]);
        let overlay = tree(&[("b", "overlay"), ("c", "overlay")]);
        let merged = base.merge(&overlay);
        assert_eq!(merged.get("a"), Some("base"));
        assert_eq!(merged.get("b"), Some("overlay"));
        assert_eq!(merged.get("c"), Some("overlay"));
        for (key, value) in overlay.iter() {
            assert_eq!(merged.get(key), Some(value));
        }
        // Sources are left untouched.
        assert_eq!(base.get("b"), Some("base"));
        assert!(!base.contains_key("c"));
    }

    #[test]
    fn lookup_without_placeholders_is_unchanged() {
        let t = tree(&[("a", "plain value }{ with braces")]);
        assert_eq!(
            t.lookup("a", &PropertyTree::new()).unwrap(),
            "plain value }{ with braces"
        );
    }

    #[test]
    fn lookup_resolves_nested_chain() {
        let mut t = PropertyTree::new();
        for i in 0..MAX_RESOLUTION_PASSES {
            t.set(format!("k{}", i), format!("<{{k{}}}>", i + 1));
        }
        t.set(format!("k{}", MAX_RESOLUTION_PASSES), "end");
        let expected = format!(
            "{}end{}",
            "<".repeat(MAX_RESOLUTION_PASSES),
            ">".repeat(MAX_RESOLUTION_PASSES)
        );
        assert_eq!(t.lookup("k0", &PropertyTree::new()).unwrap(), expected);
    }

    #[test]
    fn lookup_prefers_context() {
        let t = tree(&[("pattern", "{cmd} -P{port}"), ("cmd", "tree"), ("port", "p")]);
        let ctx = tree(&[("cmd", "context")]);
        assert_eq!(t.lookup("pattern", &ctx).unwrap(), "context -Pp");
    }

    #[test]
    fn lookup_unknown_names_resolve_to_empty() {
        let t = tree(&[("a", "x{nowhere}y")]);
        assert_eq!(t.lookup("a", &PropertyTree::new()).unwrap(), "xy");
        assert_eq!(t.lookup("missing", &PropertyTree::new()).unwrap(), "");
    }

    #[test]
    fn lookup_self_reference_fails() {
        let t = tree(&[("a", "{a}")]);
        let err = t.lookup("a", &PropertyTree::new()).unwrap_err();
        assert!(matches!(err, Error::Resolution { ref key, .. } if key == "a"));
    }

    #[test]
    fn lookup_mutual_cycle_fails() {
        let t = tree(&[("a", "x{b}"), ("b", "y{a}")]);
        assert!(t.lookup("a", &PropertyTree::new()).is_err());
    }

    #[test]
    fn to_bool_is_strict() {
        let t = tree(&[("t", "true"), ("one", "1"), ("caps", "TRUE"), ("no", "yes")]);
        assert!(t.to_bool("t"));
        assert!(t.to_bool("one"));
        assert!(!t.to_bool("caps"));
        assert!(!t.to_bool("no"));
        assert!(!t.to_bool("absent"));
    }
}
