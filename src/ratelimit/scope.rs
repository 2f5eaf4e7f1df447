//! Scope identifiers and counter key derivation.

use sha2::{Digest, Sha256};

/// The thing being rate limited: a user, an API key, an address.
///
/// A scope is one or more opaque string components. Components are never
/// interpreted, only hashed, so raw scope values never appear in cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    components: Vec<String>,
}

impl Scope {
    /// Create a scope from its components, in order.
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// The components of this scope.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// A new scope with `component` placed in front of this one's.
    pub fn prefixed(&self, component: &str) -> Self {
        let mut components = Vec::with_capacity(self.components.len() + 1);
        components.push(component.to_string());
        components.extend(self.components.iter().cloned());
        Self { components }
    }

    /// Digest of every component, joined with `:`.
    fn digest(&self) -> String {
        self.components
            .iter()
            .map(|c| digest(c))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Self::new([value])
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        Self::new([value])
    }
}

impl From<(&str, &str)> for Scope {
    fn from((first, second): (&str, &str)) -> Self {
        Self::new([first, second])
    }
}

impl From<&[&str]> for Scope {
    fn from(value: &[&str]) -> Self {
        Self::new(value.iter().copied())
    }
}

impl From<Vec<String>> for Scope {
    fn from(components: Vec<String>) -> Self {
        Self { components }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

fn digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Derive the cache key of one window of a counter.
///
/// The result is a fixed-length hex digest of the counter name, the scope
/// digest and the window index.
pub(crate) fn window_key(counter: &str, scope: &Scope, window_index: i64) -> String {
    digest(&format!("{}:{}:{}", counter, scope.digest(), window_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_conversions() {
        assert_eq!(Scope::from("alice").components(), ["alice"]);
        assert_eq!(Scope::from(("api", "alice")).components(), ["api", "alice"]);
        assert_eq!(
            Scope::from(&["a", "b", "c"][..]),
            Scope::new(["a", "b", "c"])
        );
        assert_eq!(
            Scope::from(vec!["x".to_string()]),
            Scope::from("x".to_string())
        );
    }

    #[test]
    fn test_prefixed() {
        let scope = Scope::from(("domain", "user"));
        assert_eq!(
            scope.prefixed("submissions").components(),
            ["submissions", "domain", "user"]
        );
    }

    #[test]
    fn test_window_key_is_deterministic() {
        let scope = Scope::from("alice");
        assert_eq!(window_key("week", &scope, 42), window_key("week", &scope, 42));
    }

    #[test]
    fn test_window_key_varies_with_every_input() {
        let alice = Scope::from("alice");
        let base = window_key("week", &alice, 42);

        assert_ne!(base, window_key("day", &alice, 42));
        assert_ne!(base, window_key("week", &Scope::from("bob"), 42));
        assert_ne!(base, window_key("week", &alice, 43));
    }

    #[test]
    fn test_window_key_distinguishes_component_boundaries() {
        let joined = Scope::from("a:b");
        let split = Scope::from(("a", "b"));
        assert_ne!(window_key("k", &joined, 0), window_key("k", &split, 0));
    }

    #[test]
    fn test_window_key_is_opaque_and_fixed_length() {
        let short = window_key("k", &Scope::from("x"), 0);
        let long = window_key("k", &Scope::from("someone@example.com".repeat(20).as_str()), -3);

        assert_eq!(short.len(), 64);
        assert_eq!(long.len(), 64);
        assert!(!long.contains("example"));
        assert!(long.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
