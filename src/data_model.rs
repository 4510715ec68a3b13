use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use crate::error::Result;

/// The in-memory working subset of a dataset that flows through the filter
/// chain. `bytes` holds tab-separated fields and newline-separated records;
/// `columns` are the ordered language labels, one per field.
///
/// A `Sample` is never mutated in place: each pipeline step produces a new
/// one from the previous step's output.
#[derive(Debug, Clone)]
pub struct Sample {
    pub columns: Vec<String>,
    pub bytes: Vec<u8>,
}

impl Sample {
    pub fn new(columns: Vec<String>, bytes: Vec<u8>) -> Self {
        Sample { columns, bytes }
    }

    /// Number of records in the buffer. A trailing newline does not count as
    /// an extra empty record.
    pub fn record_count(&self) -> usize {
        self.bytes.split(|&b| b == b'\n').filter(|l| !l.is_empty()).count()
    }

    /// Decode each record into a column-label -> field map. Decoding is lossy
    /// on purpose: payload bytes are not required to be valid UTF-8, only the
    /// tab and newline separators are structural.
    pub fn rows(&self) -> Vec<HashMap<String, String>> {
        self.bytes
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(
                        line.split(|&b| b == b'\t')
                            .map(|field| String::from_utf8_lossy(field).into_owned()),
                    )
                    .collect()
            })
            .collect()
    }
}

/// One element of the pipeline result stream: the sample as it stood after a
/// step, plus that step's captured diagnostic output. The initial sample is
/// reported with `stderr: None`.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    pub sample: Sample,
    pub stderr: Option<String>,
}

impl FilterOutput {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "stdout": self.sample.rows(),
            "stderr": self.stderr,
        })
    }
}

/// Collaborator interface: resolves a named dataset to its current working
/// sample (byte buffer plus ordered column labels).
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn sample(&self, dataset: &str) -> Result<Sample>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_count_ignores_trailing_newline() {
        let sample = Sample::new(
            vec!["en".into(), "de".into()],
            b"hello\thallo\nworld\twelt\n".to_vec(),
        );
        assert_eq!(sample.record_count(), 2);
    }

    #[test]
    fn rows_zip_labels_with_fields() {
        let sample = Sample::new(
            vec!["en".into(), "de".into()],
            b"hello\thallo\n".to_vec(),
        );
        let rows = sample.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["en"], "hello");
        assert_eq!(rows[0]["de"], "hallo");
    }
}
