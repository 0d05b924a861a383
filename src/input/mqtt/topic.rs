//! MQTT topic filter matching.

/// Check whether `topic` matches a subscription `filter`.
///
/// Supports the single-level (`+`) and multi-level (`#`) wildcards. A `#`
/// is only honoured as the last level, and also matches its parent level
/// (`a/#` matches `a`).
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("prism/1/state", "prism/1/state"));
        assert!(!matches("prism/1/state", "prism/1/mode"));
        assert!(!matches("prism/1", "prism/1/state"));
        assert!(!matches("prism/1/state", "prism/1"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("prism/+/state", "prism/1/state"));
        assert!(matches("prism/+/state", "prism/2/state"));
        assert!(!matches("prism/+/state", "prism/1/2/state"));
        assert!(!matches("+", "prism/1"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("prism/#", "prism/1/state"));
        assert!(matches("prism/#", "prism"));
        assert!(matches("#", "energy_data/power_grid"));
        assert!(!matches("prism/#/state", "prism/1/state"));
    }
}
