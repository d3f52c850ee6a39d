use serde::{Deserialize, Serialize};

/// Static contract of a stage: what it reads and the one key it writes
///
/// # Example
/// ```
/// use stageline::pipeline::StageDescriptor;
///
/// let descriptor = StageDescriptor::new("analyze", "summary").requires(["raw_data"]);
/// assert_eq!(descriptor.requires, vec!["raw_data"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Stage name, unique within a pipeline
    pub name: String,

    /// Keys that must be present before the stage may run
    pub requires: Vec<String>,

    /// Key the runner writes the stage's output value under
    pub output_key: String,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            output_key: output_key.into(),
        }
    }

    /// Declare required input keys
    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if !self.requires.contains(&key) {
                self.requires.push(key);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_deduplicates() {
        let descriptor = StageDescriptor::new("report", "report_html")
            .requires(["summary", "strategy"])
            .requires(["summary"]);

        assert_eq!(descriptor.requires, vec!["summary", "strategy"]);
        assert_eq!(descriptor.output_key, "report_html");
    }
}
