//! `{{placeholder}}` substitution for manifests, sources and commands
//!
//! Known placeholders:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `package` | Unique package name of the workspace |
//! | `workspace` | Workspace root |
//! | `template` | Template root |
//! | `dependency` | Rendered dependency reference (local or remote) |
//! | `dependency_name` | Name of the heavy dependency |
//! | `dependency_remote` | Remote dependency reference |
//! | `source` | The caller's statements |
//! | `sentinel` | Output separator line |
//!
//! Rendering is single-pass: substituted values are never scanned again, so
//! a script containing `{{sentinel}}` stays literal.

use std::collections::HashMap;

/// Variables available to a render call
#[derive(Debug, Clone, Default)]
pub struct Vars<'a> {
    values: HashMap<&'static str, &'a str>,
}

impl<'a> Vars<'a> {
    /// Empty variable set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable
    pub fn with(mut self, name: &'static str, value: &'a str) -> Self {
        self.values.insert(name, value);
        self
    }
}

/// Replace every known `{{name}}` in `template`; unknown ones are kept verbatim
pub fn render(template: &str, vars: &Vars<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.values.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
