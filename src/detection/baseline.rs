//! Baseline-country detection for unusual logins
//!
//! A user's "usual" country is the most frequent country among their
//! earliest logins (the baseline window). Any later login resolving to a
//! different country is unusual.
//!
//! The earliest logins are treated as ground truth. An attacker who is
//! present from the very first login poisons the baseline and will not be
//! flagged; this heuristic only targets takeover after the baseline has
//! formed, not day-zero compromise.
//!
//! The classifier is stateless: callers pass the history and counts in, so
//! it never reaches into storage on its own.

/// Number of earliest logins used to establish the usual country
pub const DEFAULT_BASELINE_COUNT: usize = 3;

/// Decides whether a login country is unusual for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineClassifier {
    baseline_count: usize,
}

impl BaselineClassifier {
    /// Create a classifier with the default baseline window of 3 logins
    pub fn new() -> Self {
        BaselineClassifier {
            baseline_count: DEFAULT_BASELINE_COUNT,
        }
    }

    /// Create a classifier with a custom baseline window
    ///
    /// A window of zero logins could never establish a baseline, so it is
    /// raised to one.
    pub fn with_baseline_count(baseline_count: usize) -> Self {
        BaselineClassifier {
            baseline_count: baseline_count.max(1),
        }
    }

    pub fn baseline_count(&self) -> usize {
        self.baseline_count
    }

    /// Establish the usual country from a creation-ordered history
    ///
    /// `history` holds the country of each of the user's logins, oldest
    /// first, with `None` for logins whose location was unknown. Only the
    /// first `baseline_count` entries are considered.
    pub fn establish_usual_country<'a>(&self, history: &'a [Option<String>]) -> Option<&'a str> {
        establish_usual_country(history, self.baseline_count)
    }

    /// Check whether `candidate_country` is unusual for the user
    ///
    /// `total_login_count` is the number of logins the user already has,
    /// not counting the one being judged. Returns false whenever the
    /// answer is indeterminate: unknown candidate, fewer logins than the
    /// baseline window, or no country established.
    pub fn is_unusual(
        &self,
        total_login_count: usize,
        history: &[Option<String>],
        candidate_country: Option<&str>,
    ) -> bool {
        let candidate = match candidate_country.map(str::trim) {
            Some(country) if !country.is_empty() => country,
            _ => return false,
        };

        if total_login_count < self.baseline_count {
            return false;
        }

        match self.establish_usual_country(history) {
            Some(usual) => candidate != usual,
            None => false,
        }
    }
}

impl Default for BaselineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Most frequent non-empty country among the first `baseline_count` entries
///
/// Ties go to the country that appears first in the window.
pub fn establish_usual_country(history: &[Option<String>], baseline_count: usize) -> Option<&str> {
    // (country, occurrences), in order of first appearance
    let mut tally: Vec<(&str, usize)> = Vec::new();

    for country in history.iter().take(baseline_count).flatten() {
        let country = country.trim();
        if country.is_empty() {
            continue;
        }
        match tally.iter_mut().find(|(seen, _)| *seen == country) {
            Some((_, count)) => *count += 1,
            None => tally.push((country, 1)),
        }
    }

    let mut usual: Option<(&str, usize)> = None;
    for (country, count) in tally {
        match usual {
            Some((_, best)) if count <= best => {}
            _ => usual = Some((country, count)),
        }
    }

    usual.map(|(country, _)| country)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(countries: &[&str]) -> Vec<Option<String>> {
        countries
            .iter()
            .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
            .collect()
    }

    #[test]
    fn test_empty_history_has_no_usual_country() {
        assert_eq!(establish_usual_country(&[], 3), None);
    }

    #[test]
    fn test_window_of_unknowns_has_no_usual_country() {
        let h = vec![None, None, None, Some("US".to_string())];
        assert_eq!(establish_usual_country(&h, 3), None);
    }

    #[test]
    fn test_majority_wins() {
        let h = history(&["US", "US", "CA"]);
        assert_eq!(establish_usual_country(&h, 3), Some("US"));

        let h = history(&["CA", "US", "US"]);
        assert_eq!(establish_usual_country(&h, 3), Some("US"));
    }

    #[test]
    fn test_tie_goes_to_earliest_occurrence() {
        let h = history(&["US", "CA", "JP"]);
        for _ in 0..10 {
            assert_eq!(establish_usual_country(&h, 3), Some("US"));
        }

        let h = history(&["JP", "CA", "US"]);
        assert_eq!(establish_usual_country(&h, 3), Some("JP"));

        let h = history(&["CA", "US", "US", "CA"]);
        assert_eq!(establish_usual_country(&h, 4), Some("CA"));
    }

    #[test]
    fn test_only_earliest_entries_count() {
        // Later logins from JP must not shift the baseline
        let h = history(&["US", "US", "CA", "JP", "JP", "JP", "JP"]);
        assert_eq!(establish_usual_country(&h, 3), Some("US"));
    }

    #[test]
    fn test_unknowns_inside_window_are_skipped() {
        let h = history(&["", "CA", "", "US"]);
        assert_eq!(establish_usual_country(&h, 3), Some("CA"));
    }

    #[test]
    fn test_insufficient_baseline_never_unusual() {
        let classifier = BaselineClassifier::new();
        for count in 0..DEFAULT_BASELINE_COUNT {
            let h = history(&vec!["US"; count]);
            for candidate in ["US", "CA", "JP", "DE"] {
                assert!(!classifier.is_unusual(count, &h, Some(candidate)));
            }
        }
    }

    #[test]
    fn test_unanimous_baseline() {
        let classifier = BaselineClassifier::new();
        for count in 3..6 {
            let h = history(&vec!["US"; count]);
            assert!(!classifier.is_unusual(count, &h, Some("US")));
            for candidate in ["CA", "JP", "DE", "GB"] {
                assert!(classifier.is_unusual(count, &h, Some(candidate)));
            }
        }
    }

    #[test]
    fn test_unknown_candidate_never_unusual() {
        let classifier = BaselineClassifier::new();
        let h = history(&["US", "US", "US"]);
        assert!(!classifier.is_unusual(3, &h, None));
        assert!(!classifier.is_unusual(3, &h, Some("")));
        assert!(!classifier.is_unusual(3, &h, Some("  ")));
    }

    #[test]
    fn test_no_established_country_never_unusual() {
        let classifier = BaselineClassifier::new();
        let h = vec![None, None, None];
        assert!(!classifier.is_unusual(3, &h, Some("CA")));
    }

    #[test]
    fn test_custom_baseline_count() {
        let classifier = BaselineClassifier::with_baseline_count(5);
        let h = history(&["US", "US", "US", "US"]);
        assert!(!classifier.is_unusual(4, &h, Some("CA")));

        let h = history(&["US", "US", "US", "US", "US"]);
        assert!(classifier.is_unusual(5, &h, Some("CA")));
    }

    #[test]
    fn test_poisoned_baseline_is_accepted_limitation() {
        // An attacker logging in from RU from day one becomes the baseline,
        // and the legitimate owner's later login is the one flagged.
        let classifier = BaselineClassifier::new();
        let h = history(&["RU", "RU", "US"]);
        assert!(!classifier.is_unusual(3, &h, Some("RU")));
        assert!(classifier.is_unusual(3, &h, Some("US")));
    }
}
