//! HTTP method matching.

/// Method wildcard accepted in route definitions.
pub const ANY_METHOD: &str = "*";

/// Route method condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatcher {
    Any,
    /// Exact, case-sensitive method name
    Exact(String),
}

impl MethodMatcher {
    pub fn new(method: &str) -> Self {
        if method == ANY_METHOD {
            Self::Any
        } else {
            Self::Exact(method.to_string())
        }
    }

    pub fn matches(&self, method: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == method,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => ANY_METHOD,
            Self::Exact(method) => method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard() {
        let matcher = MethodMatcher::new("*");
        assert!(matcher.matches("GET"));
        assert!(matcher.matches("PATCH"));
        assert_eq!(matcher.as_str(), "*");
    }

    #[test]
    fn test_exact_is_case_sensitive() {
        let matcher = MethodMatcher::new("POST");
        assert!(matcher.matches("POST"));
        assert!(!matcher.matches("post"));
        assert!(!matcher.matches("GET"));
    }
}
