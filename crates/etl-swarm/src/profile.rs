//! Size and shape of the input artifact handed to the ingestion step.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

/// Inputs above this size get a sharding suggestion.
pub const SHARD_THRESHOLD_MB: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct InputProfile {
    pub size_mb: f64,
    /// Data rows and columns, known for delimited text only
    pub rows: Option<usize>,
    pub cols: Option<usize>,
}

impl InputProfile {
    /// Profile a local file. `None` when it cannot be read.
    pub fn inspect(path: &str, format: Option<&str>) -> Option<Self> {
        let path = Path::new(path);
        let meta = std::fs::metadata(path).ok().filter(|m| m.is_file())?;
        let size_mb = meta.len() as f64 / (1024.0 * 1024.0);

        let delimited = format
            .map(|f| f.eq_ignore_ascii_case("csv") || f.eq_ignore_ascii_case("tsv"))
            .unwrap_or_else(|| path.extension().is_some_and(|e| e == "csv" || e == "tsv"));
        let (rows, cols) = if delimited {
            match count_delimited(path) {
                Ok((rows, cols)) => (Some(rows), Some(cols)),
                Err(e) => {
                    debug!(path = %path.display(), "Could not count rows: {e}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        Some(Self { size_mb, rows, cols })
    }

    pub fn needs_sharding(&self) -> bool {
        self.size_mb > SHARD_THRESHOLD_MB
    }

    /// Prompt section describing the input.
    pub fn render(&self) -> String {
        let mut lines = vec![format!("size: {:.2} MB", self.size_mb)];
        if let (Some(rows), Some(cols)) = (self.rows, self.cols) {
            lines.push(format!("shape: {rows} rows x {cols} columns"));
        }
        if self.needs_sharding() {
            lines.push(
                "Large input: read it in chunks and process the chunks in parallel; \
                 mention the sharding in the rationale."
                    .to_string(),
            );
        } else {
            lines.push("Small input: single-pass ingestion is fine.".to_string());
        }
        lines.join("\n")
    }
}

fn count_delimited(path: &Path) -> std::io::Result<(usize, usize)> {
    let mut lines = BufReader::new(File::open(path)?).lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Ok((0, 0)),
    };
    let sep = if header.contains('\t') { '\t' } else { ',' };
    let cols = header.split(sep).count();
    let mut rows = 0;
    for line in lines {
        if !line?.trim().is_empty() {
            rows += 1;
        }
    }
    Ok((rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_csv_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "order_id,region,amount\n1,eu,10\n2,us,12\n\n").unwrap();
        let profile = InputProfile::inspect(path.to_str().unwrap(), Some("csv")).unwrap();
        assert_eq!(profile.rows, Some(2));
        assert_eq!(profile.cols, Some(3));
        assert!(!profile.needs_sharding());
        let text = profile.render();
        assert!(text.contains("shape: 2 rows x 3 columns"));
        assert!(text.contains("single-pass"));
    }

    #[test]
    fn test_large_input_suggests_sharding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        std::fs::write(&path, vec![0u8; 1024 * 1024 + 1]).unwrap();
        let profile = InputProfile::inspect(path.to_str().unwrap(), Some("parquet")).unwrap();
        assert!(profile.needs_sharding());
        assert_eq!(profile.rows, None);
        assert!(profile.render().contains("chunks"));
    }

    #[test]
    fn test_missing_file_has_no_profile() {
        assert_eq!(InputProfile::inspect("/nonexistent/orders.csv", None), None);
    }
}
