//! Engine invariants over pseudo-random ordered document streams.

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use super::test_helpers::at;
use crate::data_models::{Cell, CellId, Document, Granularity};
use crate::errors::Result;
use crate::geometry::Geometry;
use crate::integration::{AggregationMode, IntegrationEngine};
use crate::parsers::json_parser::SAMPLES_PROPERTY;

/// Non-decreasing timestamps; cell 0 is always present, cells 1..6 sometimes.
fn random_stream(seed: u64, len: usize) -> Vec<Document> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut instant: NaiveDateTime = at(1, 1, 0);
    (0..len)
        .map(|_| {
            instant += Duration::hours(rng.gen_range(0..30));
            let mut cells = Vec::new();
            for id in 0..6i64 {
                if id > 0 && rng.gen_range(0..3) == 0 {
                    continue;
                }
                let value = f64::from(rng.gen_range(0..1000u32)) / 10.0;
                let geometry = Geometry::rectangle(id as f64, 0.0, id as f64 + 1.0, 1.0);
                cells.push(Cell::new(id, geometry, value));
            }
            Document::new(instant, "ghi", cells)
        })
        .collect()
}

fn aggregate(documents: &[Document], granularity: Granularity) -> Vec<Document> {
    let mut engine = IntegrationEngine::new(granularity, AggregationMode::Sum);
    engine
        .integrate(documents.iter().cloned().map(Ok))
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn test_period_keys_strictly_increase() {
    for seed in [1, 7, 42, 2024] {
        let documents = random_stream(seed, 150);
        for granularity in [Granularity::Day, Granularity::Month, Granularity::Year] {
            let out = aggregate(&documents, granularity);
            assert!(!out.is_empty());
            assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            assert!(out
                .iter()
                .all(|d| granularity.period_start(d.timestamp) == d.timestamp));
        }
    }
}

#[test]
fn test_samples_and_totals_are_conserved() {
    for seed in [3, 11, 99] {
        let documents = random_stream(seed, 120);
        let mut expected_samples: BTreeMap<CellId, u64> = BTreeMap::new();
        let mut expected_totals: BTreeMap<CellId, f64> = BTreeMap::new();
        for cell in documents.iter().flat_map(|d| &d.cells) {
            *expected_samples.entry(cell.id.clone()).or_default() += 1;
            *expected_totals.entry(cell.id.clone()).or_default() += cell.value;
        }

        for granularity in [Granularity::Hour, Granularity::Day, Granularity::Month] {
            let mut samples: BTreeMap<CellId, u64> = BTreeMap::new();
            let mut totals: BTreeMap<CellId, f64> = BTreeMap::new();
            for cell in aggregate(&documents, granularity).iter().flat_map(|d| &d.cells) {
                *samples.entry(cell.id.clone()).or_default() +=
                    cell.properties[SAMPLES_PROPERTY].as_u64().unwrap();
                *totals.entry(cell.id.clone()).or_default() += cell.value;
            }
            assert_eq!(samples, expected_samples);
            for (id, total) in &expected_totals {
                assert_relative_eq!(totals[id], *total, epsilon = 1e-6);
            }
        }
    }
}
