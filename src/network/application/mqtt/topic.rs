//! Topic names, topic filters and wildcard matching.
//!
//! ```text
//! filter            topic                 match
//! sensors/+/temp    sensors/kitchen/temp  yes
//! sensors/#         sensors               yes
//! sensors/#         sensors/a/b/c         yes
//! +/status          $SYS/status           no   ($ topics need an explicit prefix)
//! ```

use super::MAX_TOPIC_LEN;
use crate::{Error, Result};

fn check_common(s: &str) -> Result<()> {
    if s.is_empty() || s.len() > MAX_TOPIC_LEN || s.contains('\0') {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

/// Checks a topic name used for publishing. Wildcards are not allowed.
pub fn validate_topic(topic: &str) -> Result<()> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

/// Checks a subscription filter.
///
/// `+` must fill a whole level; `#` must fill the last level.
pub fn validate_filter(filter: &str) -> Result<()> {
    check_common(filter)?;
    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "#" if levels.peek().is_some() => return Err(Error::InvalidParameter),
            "#" | "+" => {}
            _ if level.contains(['+', '#']) => return Err(Error::InvalidParameter),
            _ => {}
        }
    }
    Ok(())
}

/// `true` if `topic` is covered by `filter`.
///
/// Both arguments are assumed valid.
///
/// # Examples
///
/// ```rust
/// use libiot_connect::network::application::mqtt::topic::matches;
///
/// assert!(matches("home/+/light", "home/hall/light"));
/// assert!(matches("home/#", "home"));
/// assert!(!matches("home/+", "home/hall/light"));
/// ```
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
