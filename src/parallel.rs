use indicatif::ProgressBar;
use log::info;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;

use crate::data_models::Document;
use crate::errors::Result;
use crate::file_processor::{self, file_progress};
use crate::parsers::json_parser::CodecOptions;
use crate::timestamps::TimestampResolver;

/// Windowed parallel reader using Rayon.
///
/// Parses `workers` files at a time on the Rayon pool and hands their
/// documents out in discovery order, so the single-threaded consumer sees
/// exactly the sequence a sequential read would produce. Memory stays
/// bounded by one window of parsed files.
pub struct ParallelReader<'a> {
    files: VecDeque<PathBuf>,
    buffer: VecDeque<Result<Document>>,
    window: usize,
    options: &'a CodecOptions,
    resolver: &'a dyn TimestampResolver,
    progress: ProgressBar,
    failed: bool,
}

impl<'a> ParallelReader<'a> {
    pub fn new(
        files: Vec<PathBuf>,
        workers: usize,
        options: &'a CodecOptions,
        resolver: &'a dyn TimestampResolver,
        show_progress: bool,
    ) -> Self {
        let window = workers.max(1);
        info!(
            "Initializing ParallelReader over {} files with {} workers",
            files.len(),
            window
        );
        let progress = file_progress(files.len(), show_progress);
        Self {
            files: files.into(),
            buffer: VecDeque::new(),
            window,
            options,
            resolver,
            progress,
            failed: false,
        }
    }

    fn fill(&mut self) {
        let take = self.window.min(self.files.len());
        let batch: Vec<PathBuf> = self.files.drain(..take).collect();
        let start = Instant::now();

        let options = self.options;
        let resolver = self.resolver;
        let progress = &self.progress;
        let parsed: Vec<Result<Vec<Document>>> = batch
            .par_iter()
            .map(|path| {
                let result = file_processor::process_file(path, options, resolver);
                progress.inc(1);
                result
            })
            .collect();
        crate::metrics::METRICS
            .lock()
            .record_processing_time("parallel read".to_string(), start.elapsed());

        // Keep everything up to the first failing file, then the failure.
        for result in parsed {
            match result {
                Ok(documents) => self.buffer.extend(documents.into_iter().map(Ok)),
                Err(e) => {
                    self.buffer.push_back(Err(e));
                    self.failed = true;
                    self.files.clear();
                    self.progress.abandon();
                    return;
                }
            }
        }
    }
}

impl Iterator for ParallelReader<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(item);
            }
            if self.failed {
                return None;
            }
            if self.files.is_empty() {
                self.progress.finish_and_clear();
                return None;
            }
            self.fill();
        }
    }
}
