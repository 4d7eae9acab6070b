use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Global metrics instance
pub static METRICS: Lazy<Mutex<Metrics>> = Lazy::new(|| Mutex::new(Metrics::new()));

/// Run counters. Purely observational; nothing in the pipeline reads them.
#[derive(Debug, Default)]
pub struct Metrics {
    pub total_files_attempted: u64,
    pub total_files_successful: u64,
    pub total_files_failed: u64,
    pub total_documents_read: u64,
    pub total_documents_written: u64,
    pub total_rows_read: u64,
    pub total_rows_written: u64,
    pub total_cells_written: u64,
    pub total_bytes_processed: u64,
    pub processing_times: BTreeMap<String, Duration>,
    pub start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_file_attempt(&mut self) {
        self.total_files_attempted += 1;
    }

    pub fn record_file_success(&mut self, documents: u64, bytes: u64) {
        self.total_files_successful += 1;
        self.total_documents_read += documents;
        self.total_bytes_processed += bytes;
    }

    pub fn record_file_failure(&mut self) {
        self.total_files_failed += 1;
    }

    pub fn record_document_written(&mut self, cells: u64, bytes: u64) {
        self.total_documents_written += 1;
        self.total_cells_written += cells;
        self.total_bytes_processed += bytes;
    }

    pub fn record_rows_read(&mut self, count: u64) {
        self.total_rows_read += count;
    }

    pub fn record_rows_written(&mut self, count: u64) {
        self.total_rows_written += count;
    }

    /// Timings accumulate when the same operation runs more than once.
    pub fn record_processing_time(&mut self, operation: String, duration: Duration) {
        *self.processing_times.entry(operation).or_default() += duration;
    }

    pub fn get_total_duration(&self) -> Duration {
        self.start_time
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    pub fn get_throughput(&self) -> f64 {
        let duration_secs = self.get_total_duration().as_secs_f64();
        if duration_secs > 0.0 {
            self.total_documents_read as f64 / duration_secs
        } else {
            0.0
        }
    }

    /// Summary lines, logged by the binary at the end of a run.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Total Duration: {:.2?}", self.get_total_duration()),
            format!("Files Attempted: {}", self.total_files_attempted),
            format!("Files Successful: {}", self.total_files_successful),
            format!("Files Failed: {}", self.total_files_failed),
            format!("Documents Read: {}", self.total_documents_read),
            format!("Documents Written: {}", self.total_documents_written),
            format!("Cells Written: {}", self.total_cells_written),
            format!("Rows Read: {}", self.total_rows_read),
            format!("Rows Written: {}", self.total_rows_written),
            format!(
                "Bytes Processed: {:.2} MB",
                self.total_bytes_processed as f64 / 1_048_576.0
            ),
            format!("Throughput: {:.2} documents/sec", self.get_throughput()),
        ];
        for (op, duration) in &self.processing_times {
            lines.push(format!("  {}: {:.2?}", op, duration));
        }
        lines
    }
}

/// Helper macro to time an operation
#[macro_export]
macro_rules! time_operation {
    ($name:expr, $op:expr) => {{
        let start = std::time::Instant::now();
        let result = $op;
        let duration = start.elapsed();
        $crate::metrics::METRICS
            .lock()
            .record_processing_time($name.to_string(), duration);
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_summary() {
        let mut metrics = Metrics::new();
        metrics.record_file_attempt();
        metrics.record_file_success(24, 2048);
        metrics.record_document_written(10, 1024);
        metrics.record_rows_written(10);
        metrics.record_processing_time("read".to_string(), Duration::from_millis(5));
        metrics.record_processing_time("read".to_string(), Duration::from_millis(5));

        assert_eq!(metrics.total_documents_read, 24);
        assert_eq!(metrics.total_bytes_processed, 3072);
        assert_eq!(metrics.processing_times["read"], Duration::from_millis(10));
        let summary = metrics.summary_lines();
        assert!(summary.iter().any(|l| l == "Documents Written: 1"));
        assert_eq!(metrics.total_cells_written, 10);
        assert!(summary.iter().any(|l| l == "Cells Written: 10"));
        assert!(summary.iter().any(|l| l.starts_with("  read:")));
    }

    #[test]
    fn test_time_operation_macro_records_into_global() {
        let value = crate::time_operation!("metrics test op", 2 + 2);
        assert_eq!(value, 4);
        assert!(METRICS
            .lock()
            .processing_times
            .contains_key("metrics test op"));
    }
}
