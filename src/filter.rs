use crate::config::ScanConfig;
use crate::types::ProbeOutcome;

/// Decide whether a probe outcome is a finding under `config`.
///
/// Checks run in order and stop at the first failure: protocol, title
/// keywords (any), server substring, minimum size, maximum size. Unset
/// filters do not constrain. `None` never matches.
pub fn matches(outcome: Option<&ProbeOutcome>, config: &ScanConfig) -> bool {
    let Some(outcome) = outcome else {
        return false;
    };

    if !config.protocols.contains(&outcome.protocol) {
        return false;
    }

    if !config.title_keywords.is_empty() {
        let title = outcome.title.to_lowercase();
        if !config
            .title_keywords
            .iter()
            .any(|kw| title.contains(&kw.to_lowercase()))
        {
            return false;
        }
    }

    if let Some(server) = &config.server_contains {
        if !outcome.server.to_lowercase().contains(&server.to_lowercase()) {
            return false;
        }
    }

    if let Some(min) = config.min_size {
        if outcome.content_length < min {
            return false;
        }
    }
    if let Some(max) = config.max_size {
        if outcome.content_length > max {
            return false;
        }
    }

    true
}
