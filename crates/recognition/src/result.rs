use uuid::Uuid;

/// Outcome carried by a single recognition event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ResultOutcome {
    Recognized,
    NoMatch,
    Canceled,
}

/// Identifying data and outcome of one recognition result.
///
/// Immutable once built: there are no setters, and `with_text` consumes the
/// envelope while it is still being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEnvelope {
    session_id: String,
    result_id: String,
    outcome: ResultOutcome,
    text: String,
}

impl ResultEnvelope {
    pub fn new(
        session_id: impl Into<String>,
        result_id: impl Into<String>,
        outcome: ResultOutcome,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            result_id: result_id.into(),
            outcome,
            text: String::new(),
        }
    }

    /// Build an envelope with a freshly generated result id.
    pub fn generated(session_id: impl Into<String>, outcome: ResultOutcome) -> Self {
        Self::new(session_id, new_result_id(), outcome)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn result_id(&self) -> &str {
        &self.result_id
    }

    pub fn outcome(&self) -> ResultOutcome {
        self.outcome
    }

    /// Recognized text; empty for `NoMatch` and `Canceled` results.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_canceled(&self) -> bool {
        self.outcome == ResultOutcome::Canceled
    }
}

/// 32-character lowercase hex id, the form the recognition service uses.
pub fn new_result_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_simple_hex() {
        let envelope = ResultEnvelope::generated("s1", ResultOutcome::NoMatch);
        let id = envelope.result_id();

        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, ResultEnvelope::generated("s1", ResultOutcome::NoMatch).result_id());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(ResultOutcome::Recognized.to_string(), "Recognized");
        assert_eq!(ResultOutcome::NoMatch.to_string(), "NoMatch");
        assert_eq!(ResultOutcome::Canceled.to_string(), "Canceled");
    }

    #[test]
    fn test_text_defaults_to_empty() {
        let envelope = ResultEnvelope::new("s1", "r1", ResultOutcome::Canceled);
        assert_eq!(envelope.text(), "");
        assert!(envelope.is_canceled());

        let envelope =
            ResultEnvelope::new("s1", "r2", ResultOutcome::Recognized).with_text("hello world");
        assert_eq!(envelope.text(), "hello world");
        assert!(!envelope.is_canceled());
    }
}
