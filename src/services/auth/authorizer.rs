use std::collections::HashSet;
use std::str::FromStr;

use regex::Regex;

/// How a subject pattern is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatternMatch {
    /// The pattern must match the whole subject.
    #[default]
    Full,
    /// The pattern may match anywhere in the subject.
    Search,
}

impl FromStr for PatternMatch {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "search" => Ok(Self::Search),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AuthorizationPolicy {
    Subjects(HashSet<String>),
    Pattern(Regex),
}

/// Decides whether a verified subject may pass. Subjects are compared byte for byte.
#[derive(Debug, Clone)]
pub struct SubjectAuthorizer {
    policy: AuthorizationPolicy,
}

impl SubjectAuthorizer {
    pub fn subjects<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            policy: AuthorizationPolicy::Subjects(subjects.into_iter().map(Into::into).collect()),
        }
    }

    pub fn pattern(pattern: &str, mode: PatternMatch) -> Result<Self, regex::Error> {
        let source = match mode {
            PatternMatch::Full => format!(r"\A(?:{pattern})\z"),
            PatternMatch::Search => pattern.to_string(),
        };

        Ok(Self {
            policy: AuthorizationPolicy::Pattern(Regex::new(&source)?),
        })
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    pub fn authorize(&self, subject: &str) -> bool {
        match &self.policy {
            AuthorizationPolicy::Subjects(subjects) => subjects.contains(subject),
            AuthorizationPolicy::Pattern(pattern) => pattern.is_match(subject),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_set_is_case_sensitive_and_ignores_duplicates() {
        let authorizer = SubjectAuthorizer::subjects(["svc-b", "svc-a", "svc-a"]);

        assert!(authorizer.authorize("svc-a"));
        assert!(authorizer.authorize("svc-b"));
        assert!(!authorizer.authorize("svc-c"));
        assert!(!authorizer.authorize("SVC-A"));
        assert!(!authorizer.authorize(" svc-a"));
        assert!(!authorizer.authorize("svc-a "));
        assert!(!authorizer.authorize(""));

        match authorizer.policy() {
            AuthorizationPolicy::Subjects(subjects) => assert_eq!(subjects.len(), 2),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn empty_set_denies_everything() {
        let authorizer = SubjectAuthorizer::subjects(Vec::<String>::new());
        assert!(!authorizer.authorize("svc-a"));
        assert!(!authorizer.authorize(""));
    }

    #[test]
    fn full_match_requires_whole_subject() {
        let authorizer = SubjectAuthorizer::pattern("radix", PatternMatch::Full).unwrap();

        assert!(authorizer.authorize("radix"));
        assert!(!authorizer.authorize("radix-fail"));
        assert!(!authorizer.authorize("not-radix"));
        assert!(!authorizer.authorize("Radix"));
    }

    #[test]
    fn full_match_wraps_alternations() {
        let authorizer = SubjectAuthorizer::pattern("svc-a|svc-b", PatternMatch::Full).unwrap();

        assert!(authorizer.authorize("svc-a"));
        assert!(authorizer.authorize("svc-b"));
        assert!(!authorizer.authorize("svc-a-extra"));
        assert!(!authorizer.authorize("x-svc-b"));
    }

    #[test]
    fn search_matches_anywhere() {
        let authorizer = SubjectAuthorizer::pattern("radix", PatternMatch::Search).unwrap();

        assert!(authorizer.authorize("radix"));
        assert!(authorizer.authorize("radix-fail"));
        assert!(authorizer.authorize("not-radix"));
        assert!(!authorizer.authorize("RADIX"));

        let anchored = SubjectAuthorizer::pattern("^radix$", PatternMatch::Search).unwrap();
        assert!(anchored.authorize("radix"));
        assert!(!anchored.authorize("radix-fail"));
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(SubjectAuthorizer::pattern("(unclosed", PatternMatch::Full).is_err());
        assert!(SubjectAuthorizer::pattern("(unclosed", PatternMatch::Search).is_err());
    }

    #[test]
    fn pattern_match_parses() {
        assert_eq!("full".parse::<PatternMatch>(), Ok(PatternMatch::Full));
        assert_eq!("search".parse::<PatternMatch>(), Ok(PatternMatch::Search));
        assert!("Full".parse::<PatternMatch>().is_err());
        assert_eq!(PatternMatch::default(), PatternMatch::Full);
    }
}
