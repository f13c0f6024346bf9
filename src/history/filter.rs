//! Include/exclude path filter
//!
//! Patterns are ant-style globs separated by `:`, `;` or `,`:
//! `**` crosses directory boundaries, `*` and `?` do not, and a trailing
//! `/` matches everything below a directory.

use regex::Regex;

/// Decides which module-relative paths take part in the history.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PathFilter {
    /// Builds a filter from pattern lists; `None` or empty means "no restriction".
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            include: compile_list(include)?,
            exclude: compile_list(exclude)?,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|re| re.is_match(path));
        included && !self.exclude.iter().any(|re| re.is_match(path))
    }

    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

fn compile_list(patterns: Option<&str>) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .unwrap_or_default()
        .split([':', ';', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(&glob_to_regex(p)))
        .collect()
}

/// Translates one ant-style glob into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let glob = glob.replace('\\', "/");
    let glob = match glob.strip_suffix('/') {
        Some(dir) => format!("{}/**", dir),
        None => glob,
    };

    let chars: Vec<char> = glob.chars().collect();
    let mut re = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    re
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrestricted_filter_matches_everything() {
        let filter = PathFilter::new(None, Some("")).unwrap();
        assert!(filter.is_unrestricted());
        assert!(filter.matches("any/path.c"));
    }

    #[test]
    fn test_single_star_stays_in_directory() {
        let filter = PathFilter::new(Some("*.c"), None).unwrap();
        assert!(filter.matches("main.c"));
        assert!(!filter.matches("src/main.c"));
    }

    #[test]
    fn test_double_star_crosses_directories() {
        let filter = PathFilter::new(Some("**/*.java;build.xml"), Some("**/generated/**")).unwrap();
        assert!(filter.matches("Main.java"));
        assert!(filter.matches("src/net/Main.java"));
        assert!(filter.matches("build.xml"));
        assert!(!filter.matches("src/generated/Parser.java"));
        assert!(!filter.matches("README"));
    }

    #[test]
    fn test_trailing_slash_matches_subtree() {
        let filter = PathFilter::new(None, Some("vendor/, docs/*.txt")).unwrap();
        assert!(!filter.matches("vendor/lib/a.c"));
        assert!(!filter.matches("docs/notes.txt"));
        assert!(filter.matches("docs/api/notes.txt"));
        assert!(filter.matches("src/vendor.c"));
    }

    #[test]
    fn test_question_mark_and_literal_dots() {
        let filter = PathFilter::new(Some("v?.c"), None).unwrap();
        assert!(filter.matches("v1.c"));
        assert!(!filter.matches("v12.c"));
        assert!(!filter.matches("v1xc"));
    }
}
