use serde::{Deserialize, Serialize};

/// Warning collected while reshaping a request for an upstream schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    /// "warning" or "info"
    pub level: String,
    pub message: String,
}

/// Warnings accumulated during a single conversion pass.
///
/// Conversions are lossy by design; what was dropped is reported here so
/// the embedding layer can surface it (e.g. as a response header) instead
/// of losing it silently.
#[derive(Debug, Clone, Default)]
pub struct ConversionWarnings {
    warnings: Vec<Warning>,
}

impl ConversionWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unsupported_param(&mut self, param: &str, provider: &str) {
        self.warnings.push(Warning {
            level: "warning".to_string(),
            message: format!(
                "Parameter '{}' not supported by {} provider, ignoring",
                param, provider
            ),
        });
    }

    pub fn add_warning(&mut self, message: String) {
        self.warnings.push(Warning {
            level: "warning".to_string(),
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn merge(&mut self, other: ConversionWarnings) {
        self.warnings.extend(other.warnings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_unsupported_param() {
        let mut warnings = ConversionWarnings::new();
        warnings.add_unsupported_param("logit_bias", "Gemini");

        assert_eq!(warnings.warnings().len(), 1);
        assert!(warnings.warnings()[0].message.contains("logit_bias"));
        assert!(warnings.warnings()[0].message.contains("Gemini"));
    }

    #[test]
    fn test_merge() {
        let mut first = ConversionWarnings::new();
        first.add_warning("one".to_string());
        let mut second = ConversionWarnings::new();
        second.add_warning("two".to_string());

        first.merge(second);
        assert_eq!(first.warnings().len(), 2);
    }
}
