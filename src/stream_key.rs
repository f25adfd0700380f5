use std::fmt;

/// Secret half of an ingest URL. Display and Debug never print it whole.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StreamKey(String);

impl StreamKey {
    /// Trims surrounding whitespace; `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self(key.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        if prefix.len() == self.0.len() {
            write!(f, "****")
        } else {
            write!(f, "{}****", prefix)
        }
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamKey({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_are_rejected() {
        assert!(StreamKey::parse("").is_none());
        assert!(StreamKey::parse("  \t\n").is_none());
        assert_eq!(StreamKey::parse(" abcd-efgh ").unwrap().expose(), "abcd-efgh");
    }

    #[test]
    fn display_redacts() {
        let key = StreamKey::parse("abcd-efgh-ijkl").unwrap();
        assert_eq!(key.to_string(), "abcd****");
        assert_eq!(format!("{:?}", key), "StreamKey(abcd****)");
        assert_eq!(StreamKey::parse("abc").unwrap().to_string(), "****");
    }
}
