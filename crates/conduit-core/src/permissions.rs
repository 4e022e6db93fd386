//! Permission-mode and permission-pattern primitives (spec.md §3, §4.3, §8).

use serde::{Deserialize, Serialize};

/// Permission mode under which the child consults the CapabilityServer
/// before executing a tool (spec.md §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Every sensitive tool call is mediated.
    Default,
    /// Edits are auto-accepted; other sensitive tools still mediated.
    AcceptEdits,
    /// Read-only planning mode.
    Plan,
}

impl PermissionMode {
    /// Parse a permission mode, accepting the external-caller equivalences
    /// listed in spec.md §4.3 (`normal|ask -> default`, `auto-edit|autoEdit
    /// -> acceptEdits`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "default" | "normal" | "ask" => Some(Self::Default),
            "acceptEdits" | "auto-edit" | "autoEdit" => Some(Self::AcceptEdits),
            "plan" => Some(Self::Plan),
            _ => None,
        }
    }

    /// The canonical wire string for this mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool-name + pattern pair used to decide whether a tool invocation may
/// be auto-allowed (spec.md §3, PermissionPattern).
///
/// Pattern matches against the tool's canonical "value": a command string
/// for shell-like tools, a file path for file tools.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPattern {
    /// Tool name identifying the match target.
    pub tool_name: String,
    /// Pattern string. Empty matches everything for this tool.
    pub pattern: String,
}

impl PermissionPattern {
    /// Build a new pattern.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            pattern: pattern.into(),
        }
    }

    /// Whether `value` matches this pattern, per spec.md §3/§8:
    /// - empty pattern matches everything
    /// - `prefix:*` matches at a word boundary (`git:*` matches `git` and
    ///   `git status`, not `gitk`)
    /// - `*`/`**` are plain globs (`git*` matches `gitk`)
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        if self.pattern.is_empty() {
            return true;
        }
        if let Some(prefix) = self.pattern.strip_suffix(":*") {
            return value == prefix || value.starts_with(&format!("{prefix} "));
        }
        glob_match(&self.pattern, value)
    }

    /// Suggested pattern for a tool+value pair, as illustrated in spec.md §8:
    /// `Bash{command:"pnpm install --save-dev vitest"}` -> `Bash(pnpm:*)`;
    /// `Write{file_path:"./src/components/App.tsx"}` -> `Write(./src/components/**)`.
    #[must_use]
    pub fn suggest(tool_name: &str, value: &str) -> String {
        if let Some(first_word) = value.split_whitespace().next() {
            if tool_name.eq_ignore_ascii_case("bash") || tool_name.eq_ignore_ascii_case("shell") {
                return format!("{tool_name}({first_word}:*)");
            }
        }
        if let Some(dir) = value.rsplit_once('/').map(|(dir, _)| dir) {
            if !dir.is_empty() {
                return format!("{tool_name}({dir}/**)");
            }
        }
        format!("{tool_name}({value})")
    }
}

/// Minimal glob matcher supporting `*` (any run of characters, no path
/// separator semantics implied) and `**` (any run of characters including
/// separators). `?` is not part of the supported alphabet — the source
/// grammar (spec.md §9 Open Question 3) only exercises `*`/`**`.
fn glob_match(pattern: &str, value: &str) -> bool {
    let pat_bytes: Vec<char> = pattern.chars().collect();
    let val_bytes: Vec<char> = value.chars().collect();
    glob_match_rec(&pat_bytes, &val_bytes)
}

fn glob_match_rec(pattern: &[char], value: &[char]) -> bool {
    match pattern.first() {
        None => value.is_empty(),
        Some('*') => {
            // Collapse consecutive '*' (covers "**" identically to "*" since
            // neither carries path-separator semantics here).
            let mut rest = pattern;
            while rest.first() == Some(&'*') {
                rest = &rest[1..];
            }
            if rest.is_empty() {
                return true;
            }
            for i in 0..=value.len() {
                if glob_match_rec(rest, &value[i..]) {
                    return true;
                }
            }
            false
        }
        Some(&c) => match value.first() {
            Some(&v) if v == c => glob_match_rec(&pattern[1..], &value[1..]),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_equivalences() {
        assert_eq!(PermissionMode::parse("normal"), Some(PermissionMode::Default));
        assert_eq!(PermissionMode::parse("ask"), Some(PermissionMode::Default));
        assert_eq!(
            PermissionMode::parse("auto-edit"),
            Some(PermissionMode::AcceptEdits)
        );
        assert_eq!(
            PermissionMode::parse("autoEdit"),
            Some(PermissionMode::AcceptEdits)
        );
        assert_eq!(PermissionMode::parse("plan"), Some(PermissionMode::Plan));
        assert_eq!(PermissionMode::parse("bogus"), None);
    }

    #[test]
    fn mode_roundtrip_string() {
        assert_eq!(PermissionMode::Default.as_str(), "default");
        assert_eq!(PermissionMode::AcceptEdits.as_str(), "acceptEdits");
    }

    #[test]
    fn empty_pattern_matches_all() {
        let p = PermissionPattern::new("Bash", "");
        assert!(p.matches("anything at all"));
    }

    #[test]
    fn word_boundary_prefix() {
        let p = PermissionPattern::new("Bash", "git:*");
        assert!(p.matches("git"));
        assert!(p.matches("git status"));
        assert!(p.matches("git commit -m \"msg\""));
        assert!(!p.matches("gitk"));
    }

    #[test]
    fn glob_star_matches_prefix_with_no_boundary() {
        let p = PermissionPattern::new("Bash", "git*");
        assert!(p.matches("gitk"));
        assert!(p.matches("git status"));
    }

    #[test]
    fn double_star_glob() {
        let p = PermissionPattern::new("Write", "./src/components/**");
        assert!(p.matches("./src/components/App.tsx"));
        assert!(p.matches("./src/components/nested/App.tsx"));
        assert!(!p.matches("./src/other/App.tsx"));
    }

    #[test]
    fn suggest_bash_pattern() {
        let s = PermissionPattern::suggest("Bash", "pnpm install --save-dev vitest");
        assert_eq!(s, "Bash(pnpm:*)");
    }

    #[test]
    fn suggest_write_pattern() {
        let s = PermissionPattern::suggest("Write", "./src/components/App.tsx");
        assert_eq!(s, "Write(./src/components/**)");
    }

    #[test]
    fn no_glob_is_exact_match() {
        let p = PermissionPattern::new("Read", "config.toml");
        assert!(p.matches("config.toml"));
        assert!(!p.matches("config.toml.bak"));
    }
}
