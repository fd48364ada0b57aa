use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32String};
use std::sync::Arc;

use super::scheme::{Scheme, scheme_display_name};

/// Search case sensitivity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Smart case: case-insensitive unless query contains uppercase letters
    #[default]
    SmartCase,
    /// Case-sensitive search (always)
    CaseSensitive,
}

/// Fuzzy matcher over scheme display names
pub struct SchemeSearch {
    matcher: Matcher,
    mode: SearchMode,
}

impl SchemeSearch {
    pub fn new() -> Self {
        SchemeSearch {
            matcher: Matcher::new(Config::DEFAULT),
            mode: SearchMode::default(),
        }
    }

    pub fn set_mode(&mut self, mode: SearchMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Match `query` against the display names of `schemes`
    /// Returns (scheme name, score) sorted by score descending; equal
    /// scores keep the order of `schemes`
    pub fn search<T: Scheme>(&mut self, schemes: &[Arc<T>], query: &str) -> Vec<(String, u32)> {
        if query.is_empty() {
            return schemes
                .iter()
                .map(|s| (s.name().to_string(), u32::MAX))
                .collect();
        }

        let case_matching = match self.mode {
            SearchMode::SmartCase => CaseMatching::Smart,
            SearchMode::CaseSensitive => CaseMatching::Respect,
        };
        let pattern = Pattern::parse(query, case_matching, Normalization::Smart);

        let mut results: Vec<(String, u32)> = schemes
            .iter()
            .filter_map(|scheme| {
                // The editable-copy prefix never takes part in matching
                let haystack = Utf32String::from(scheme_display_name(&**scheme));
                pattern
                    .score(haystack.slice(..), &mut self.matcher)
                    .map(|score| (scheme.name().to_string(), score))
            })
            .collect();

        results.sort_by(|a, b| b.1.cmp(&a.1));
        results
    }
}

impl Default for SchemeSearch {
    fn default() -> Self {
        Self::new()
    }
}
