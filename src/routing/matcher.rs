//! Pool name formatting and matching.
//!
//! # Responsibilities
//! - Expand a pool name format (`%a` application, `%n` namespace)
//! - Recognize pool record file names produced by the same format
//!
//! # Design Decisions
//! - Unknown `%x` directives expand to nothing
//! - Matching treats every directive as a wildcard; no regex

/// Suffix of persisted pool records.
pub const POOL_FILE_SUFFIX: &str = ".pool";

/// A compiled pool name format such as `pool_ose_%a_%n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolNameFormat {
    template: String,
    /// Literal text between directives, in order.
    literals: Vec<String>,
}

impl PoolNameFormat {
    /// Compile a format string.
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let mut literals = vec![String::new()];
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c == '%' {
                if chars.next().is_some() {
                    literals.push(String::new());
                } else if let Some(l) = literals.last_mut() {
                    // A trailing '%' has no directive to pair with.
                    l.push('%');
                }
            } else if let Some(l) = literals.last_mut() {
                l.push(c);
            }
        }
        Self { template, literals }
    }

    /// The original format string.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Expand the format for one application.
    pub fn expand(&self, app_name: &str, namespace: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + app_name.len() + namespace.len());
        let mut chars = self.template.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('a') => out.push_str(app_name),
                Some('n') => out.push_str(namespace),
                Some(_) => {}
                None => out.push('%'),
            }
        }
        out
    }

    /// Return the pool name if `candidate` could have been produced by this format.
    pub fn matches<'a>(&self, candidate: &'a str) -> Option<&'a str> {
        let (first, rest) = self.literals.split_first()?;
        let mut remaining = candidate.strip_prefix(first.as_str())?;

        if let Some((last, middle)) = rest.split_last() {
            for literal in middle {
                let at = remaining.find(literal.as_str())?;
                remaining = &remaining[at + literal.len()..];
            }
            if !remaining.ends_with(last.as_str()) {
                return None;
            }
        } else if !remaining.is_empty() {
            return None;
        }
        Some(candidate)
    }

    /// Return the pool name stored in a record file name, if any.
    pub fn pool_from_file_name<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        let stem = file_name.strip_suffix(POOL_FILE_SUFFIX)?;
        self.matches(stem)
    }
}
