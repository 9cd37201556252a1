use crate::error::Result;
use regex::Regex;

/// Inclusion/exclusion patterns of a role
///
/// A label matches when every pattern of at least one AND-group is found in
/// it and none of the exclusion patterns is. Patterns are searched anywhere in
/// the label and are case-sensitive unless they opt out with `(?i)`.
#[derive(Debug, Clone)]
pub struct Criteria {
    any_of: Vec<Vec<Regex>>,
    none_of: Vec<Regex>,
}

impl Criteria {
    /// Compiles the pattern groups
    ///
    /// # Errors
    ///
    /// Returns [`crate::PrepError::PatternError`] for the first invalid pattern.
    pub fn new<S: AsRef<str>>(any_of: &[Vec<S>], none_of: &[S]) -> Result<Self> {
        let any_of = any_of
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|p| Regex::new(p.as_ref()))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let none_of = none_of
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { any_of, none_of })
    }

    pub fn matches(&self, label: &str) -> bool {
        let included = self
            .any_of
            .iter()
            .any(|group| group.iter().all(|re| re.is_match(label)));
        included && !self.none_of.iter().any(|re| re.is_match(label))
    }
}
