use crate::err::{DecodeError, DecodeErrorKind};

/// A single level of a topic filter: a literal name, `+` (single-level
/// wildcard), or `#` (multi-level wildcard, only legal as the final level).
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
enum FilterToken {
    Literal(String),
    SingleLevel,
    MultiLevel,
}

impl FilterToken {
    fn from_str(s: &str) -> Self {
        match s {
            "+" => Self::SingleLevel,
            "#" => Self::MultiLevel,
            _ => Self::Literal(s.to_owned()),
        }
    }
}

/// A parsed topic filter, e.g. `school/+/status` or `school/#`, as used by
/// SUBSCRIBE and by stored ACL rows.
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct TopicFilter(Vec<FilterToken>);

impl TopicFilter {
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedTopicFilter,
                "topic filter must not be empty".to_owned(),
            ));
        }

        let levels: Vec<&str> = raw.split('/').collect();
        let mut tokens = Vec::with_capacity(levels.len());
        for (i, level) in levels.iter().enumerate() {
            let token = FilterToken::from_str(level);
            if matches!(token, FilterToken::MultiLevel) && i != levels.len() - 1 {
                return Err(DecodeError::new(
                    DecodeErrorKind::MalformedTopicFilter,
                    format!("'#' must be the final level of filter {raw:?}"),
                ));
            }
            tokens.push(token);
        }

        return Ok(Self(tokens));
    }

    /// MQTT-style match: `+` matches exactly one non-empty level, `#` (only
    /// ever final) matches every remaining level *and* the level at its own
    /// position — so `a/#` also matches the bare topic `a`, the conventional
    /// MQTT interpretation this crate adopts.
    pub fn matches(&self, topic: &str) -> bool {
        let topic_levels: Vec<&str> = topic.split('/').collect();

        for (i, token) in self.0.iter().enumerate() {
            match token {
                FilterToken::MultiLevel => return true,
                FilterToken::SingleLevel => {
                    if i >= topic_levels.len() {
                        return false;
                    }
                }
                FilterToken::Literal(expected) => {
                    if i >= topic_levels.len() || topic_levels[i] != expected.as_str() {
                        return false;
                    }
                }
            }
        }

        return topic_levels.len() == self.0.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_level_matches_prefix_and_parent() {
        let filter = TopicFilter::parse("a/#").unwrap();
        assert!(filter.matches("a"));
        assert!(filter.matches("a/b"));
        assert!(filter.matches("a/b/c"));
        assert!(!filter.matches("x/b"));
    }

    #[test]
    fn single_level_matches_exactly_one_level() {
        let filter = TopicFilter::parse("a/+/c").unwrap();
        assert!(filter.matches("a/b/c"));
        assert!(!filter.matches("a/b/c/d"));
        assert!(!filter.matches("a/c"));
    }

    #[test]
    fn literal_requires_equal_level_count() {
        let filter = TopicFilter::parse("school/demo").unwrap();
        assert!(filter.matches("school/demo"));
        assert!(!filter.matches("school/demo/extra"));
        assert!(!filter.matches("school"));
    }

    #[test]
    fn non_final_multi_level_is_rejected() {
        assert!(TopicFilter::parse("a/#/b").is_err());
    }

    #[test]
    fn empty_filter_is_rejected() {
        assert!(TopicFilter::parse("").is_err());
    }
}
