//! Protected-subtree path filter
//!
//! Only writes to keys at or below one root path are captured. A path passes
//! when it equals the root or continues it with a key separator, so a sibling
//! such as `\REGISTRY\MACHINEX` does not match `\REGISTRY\MACHINE`.

use crate::constants::{DEFAULT_PROTECTED_ROOT, KEY_SEPARATOR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    root: String,
    case_sensitive: bool,
}

impl PathFilter {
    /// Trailing separators on `root` are ignored
    pub fn new(root: &str, case_sensitive: bool) -> Self {
        Self {
            root: root.trim_end_matches(KEY_SEPARATOR).to_string(),
            case_sensitive,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn matches(&self, path: &str) -> bool {
        let rest = if self.case_sensitive {
            path.strip_prefix(self.root.as_str())
        } else {
            strip_prefix_folded(path, &self.root)
        };
        match rest {
            Some(rest) => rest.is_empty() || rest.starts_with(KEY_SEPARATOR),
            None => false,
        }
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::new(DEFAULT_PROTECTED_ROOT, true)
    }
}

/// Case-folding `strip_prefix`, compared char by char without allocating
fn strip_prefix_folded<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let mut end = 0;
    for expected in prefix.chars() {
        let actual = path[end..].chars().next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        end += actual.len_utf8();
    }
    Some(&path[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_itself_passes() {
        let filter = PathFilter::new(r"\REGISTRY\MACHINE", true);
        assert!(filter.matches(r"\REGISTRY\MACHINE"));
    }

    #[test]
    fn test_descendants_pass() {
        let filter = PathFilter::default();
        assert!(filter.matches(r"\REGISTRY\MACHINE\SOFTWARE"));
        assert!(filter.matches(r"\REGISTRY\MACHINE\SYSTEM\CurrentControlSet\Services"));
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_rejected() {
        let filter = PathFilter::new(r"\REGISTRY\MACHINE", true);
        assert!(!filter.matches(r"\REGISTRY\MACHINEX"));
        assert!(!filter.matches(r"\REGISTRY\MACHINE2\SOFTWARE"));
        assert!(!filter.matches(r"\REGISTRY\USER\S-1-5-21"));
        assert!(!filter.matches(r"\REGISTRY"));
        assert!(!filter.matches(""));
    }

    #[test]
    fn test_case_sensitive_mode_rejects_other_case() {
        let filter = PathFilter::new(r"\REGISTRY\MACHINE", true);
        assert!(filter.is_case_sensitive());
        assert!(!filter.matches(r"\Registry\Machine\SOFTWARE"));
        assert!(!filter.matches(r"\registry\machine"));
    }

    #[test]
    fn test_default_is_case_sensitive() {
        let filter = PathFilter::default();
        assert!(filter.is_case_sensitive());
        assert!(!filter.matches(r"\registry\machine\software"));
    }

    #[test]
    fn test_case_insensitive_mode_folds_case() {
        let filter = PathFilter::new(r"\REGISTRY\MACHINE", false);
        assert_eq!(filter.root(), r"\REGISTRY\MACHINE");
        assert!(filter.matches(r"\Registry\Machine\SOFTWARE"));
        assert!(filter.matches(r"\registry\machine"));
        assert!(!filter.matches(r"\registry\machinex"));
        assert!(!filter.matches(r"\registry\mach"));
    }

    #[test]
    fn test_case_insensitive_mode_handles_non_ascii() {
        let filter = PathFilter::new(r"\REGISTRY\MACHINE\SOFTWARE\ÉDITEUR", false);
        assert!(filter.matches(r"\registry\machine\software\éditeur\Key"));
        assert!(!filter.matches(r"\registry\machine\software\editeur"));
    }

    #[test]
    fn test_trailing_separator_on_root_is_ignored() {
        let filter = PathFilter::new(r"\REGISTRY\MACHINE\", true);
        assert_eq!(filter.root(), r"\REGISTRY\MACHINE");
        assert!(filter.matches(r"\REGISTRY\MACHINE"));
        assert!(filter.matches(r"\REGISTRY\MACHINE\SOFTWARE"));
        assert!(!filter.matches(r"\REGISTRY\MACHINEX"));
    }
}
