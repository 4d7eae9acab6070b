use approx::assert_relative_eq;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use super::test_helpers::*;
use crate::bridge::FromRowsOptions;
use crate::config::PipelineConfig;
use crate::data_models::{CellId, Document, Granularity};
use crate::enrich::{GridProjection, LAT_PROPERTY, LON_PROPERTY};
use crate::geometry::Geometry;
use crate::integration::AggregationMode;
use crate::parsers::json_parser::SAMPLES_PROPERTY;
use crate::pipeline::{Pipeline, REGISTRY_SNAPSHOT};
use crate::registry::CellRegistry;

fn value_of(document: &Document, id: &str) -> f64 {
    document.cell(&CellId::from(id)).unwrap().value
}

/// Two raw multi-timestep files: hours 0-2 and 24-25 of a 2x1 grid.
fn write_raw_grid(dir: &Path) {
    write_hours(
        dir,
        "0-2.json",
        vec![
            vec![grid_feature(0, 0, 1.0), grid_feature(1, 0, 10.0)],
            vec![grid_feature(0, 0, 2.0), grid_feature(1, 0, 20.0)],
            vec![grid_feature(0, 0, 3.0), grid_feature(1, 0, 30.0)],
        ],
    );
    write_hours(
        dir,
        "24-25.json",
        vec![
            vec![grid_feature(0, 0, 4.0), grid_feature(1, 0, 40.0)],
            vec![grid_feature(0, 0, 5.0), grid_feature(1, 0, 50.0)],
        ],
    );
}

#[test]
fn test_monthly_average_skips_missing_cells() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_collection(
        input.path(),
        "a.json",
        at(1, 1, 0),
        vec![cell_feature("X", 0.0, "ghi", 1.0), cell_feature("Y", 1.0, "ghi", 2.0)],
    );
    write_collection(input.path(), "b.json", at(1, 2, 0), vec![cell_feature("X", 0.0, "ghi", 2.0)]);
    write_collection(
        input.path(),
        "c.json",
        at(1, 3, 0),
        vec![cell_feature("X", 0.0, "ghi", 3.0), cell_feature("Y", 1.0, "ghi", 4.0)],
    );

    let pipeline = Pipeline::new(quiet_config()).unwrap();
    let summary = pipeline
        .integrate(Granularity::Month, AggregationMode::Average, input.path(), output.path())
        .unwrap();
    assert_eq!(summary.documents_in, 3);
    assert_eq!(summary.documents_out, 1);
    assert_eq!(summary.cells, 2);

    let documents = read_output(output.path());
    assert_eq!(documents.len(), 1);
    let month = &documents[0];
    assert_eq!(month.timestamp, at(1, 1, 0));
    assert_eq!(month.granularity, Some(Granularity::Month));
    assert_eq!(month.value_property, "ghi");
    assert_relative_eq!(value_of(month, "X"), 2.0);
    assert_relative_eq!(value_of(month, "Y"), 3.0);
    let y = month.cell(&CellId::from("Y")).unwrap();
    assert_eq!(y.properties[SAMPLES_PROPERTY], 2);
}

#[test]
fn test_full_chain_from_raw_hours_to_enriched_months() {
    let raw = tempdir().unwrap();
    let daily = tempdir().unwrap();
    let rows = tempdir().unwrap();
    let forecast = tempdir().unwrap();
    let monthly = tempdir().unwrap();
    let enriched = tempdir().unwrap();
    write_raw_grid(raw.path());
    let pipeline = Pipeline::new(quiet_config()).unwrap();

    // Hourly samples integrated over one hour each
    let summary = pipeline
        .integrate(Granularity::Day, AggregationMode::Sum, raw.path(), daily.path())
        .unwrap();
    assert_eq!(summary.documents_in, 5);
    assert_eq!(summary.documents_out, 2);
    let days = read_output(daily.path());
    assert_eq!(days[0].timestamp, at(1, 1, 0));
    assert_eq!(days[1].timestamp, at(1, 2, 0));
    assert_eq!(days[0].value_property, "energy");
    assert_relative_eq!(value_of(&days[0], "0_0"), 6.0 * 3600.0, epsilon = 1e-6);
    assert_relative_eq!(value_of(&days[1], "0_0"), 9.0 * 3600.0, epsilon = 1e-6);
    assert_relative_eq!(value_of(&days[1], "1_0"), 90.0 * 3600.0, epsilon = 1e-6);

    let summary = pipeline.to_rows(daily.path(), rows.path()).unwrap();
    assert_eq!(summary.rows, 4);
    assert_eq!(
        file_names(rows.path()),
        vec![
            "2007-01-01T000000.000Z.csv".to_string(),
            "2007-01-02T000000.000Z.csv".to_string(),
            REGISTRY_SNAPSHOT.to_string(),
        ]
    );

    // The row directory doubles as the registry source through its snapshot
    let summary = pipeline
        .from_rows(rows.path(), rows.path(), forecast.path(), FromRowsOptions::default())
        .unwrap();
    assert_eq!(summary.documents_out, 2);
    assert_eq!(summary.cells, 2);
    let rebuilt = read_output(forecast.path());
    assert_eq!(rebuilt.len(), 2);
    for (original, copy) in days.iter().zip(&rebuilt) {
        assert_eq!(original.timestamp, copy.timestamp);
        for cell in &original.cells {
            let twin = copy.cell(&cell.id).unwrap();
            assert_eq!(twin.geometry, cell.geometry);
            assert_relative_eq!(twin.value, cell.value, epsilon = 1e-6);
        }
    }

    pipeline
        .rollup(Granularity::Month, forecast.path(), monthly.path())
        .unwrap();
    let months = read_output(monthly.path());
    assert_eq!(months.len(), 1);
    assert_eq!(months[0].value_property, "monthlyenergy");
    assert_relative_eq!(value_of(&months[0], "0_0"), 54000.0, epsilon = 1e-6);
    assert_eq!(months[0].cells[0].properties[SAMPLES_PROPERTY], 2);

    // coords[xi][yi] = [lat, lon]
    let table = json!([
        [[50.0, 10.0], [50.0, 11.0]],
        [[51.0, 10.0], [51.0, 11.0]],
        [[52.0, 10.0], [52.0, 11.0]],
    ]);
    let projection = GridProjection::from_value(table, "coords.json").unwrap();
    pipeline
        .enrich(monthly.path(), enriched.path(), Some(projection))
        .unwrap();
    let located = read_output(enriched.path());
    let cell = located[0].cell(&CellId::from("1_0")).unwrap();
    assert!(matches!(cell.geometry, Geometry::Polygon(_)));
    assert_relative_eq!(cell.properties[LON_PROPERTY].as_f64().unwrap(), 10.5, epsilon = 1e-9);
    assert_relative_eq!(cell.properties[LAT_PROPERTY].as_f64().unwrap(), 51.5, epsilon = 1e-9);
    assert_relative_eq!(cell.value, 150.0 * 3600.0, epsilon = 1e-6);
}

#[test]
fn test_unknown_cell_writes_nothing() {
    let rows = tempdir().unwrap();
    let registry_dir = tempdir().unwrap();
    let output = tempdir().unwrap();

    let mut registry = CellRegistry::new();
    registry
        .insert(CellId::from("0_0"), Geometry::point(0.0, 0.0), "test")
        .unwrap();
    let snapshot = registry_dir.path().join(REGISTRY_SNAPSHOT);
    registry.save(&snapshot).unwrap();

    fs::write(
        rows.path().join("a.csv"),
        "cell_id,timestamp,value\n0_0,2007-01-01T00:00:00,1.5\n",
    )
    .unwrap();
    fs::write(
        rows.path().join("b.csv"),
        "cell_id,timestamp,value\n0_0,2007-01-02T00:00:00,2.5\n9_9,2007-01-02T00:00:00,3.5\n",
    )
    .unwrap();

    let pipeline = Pipeline::new(quiet_config()).unwrap();
    let err = pipeline
        .from_rows(rows.path(), &snapshot, output.path(), FromRowsOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), "UnknownCellError");
    assert!(err.artifact().ends_with("b.csv"));
    assert!(file_names(output.path()).is_empty());
}

#[test]
fn test_out_of_order_timestamps_rejected() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_collection(input.path(), "a.json", at(1, 2, 0), vec![cell_feature("X", 0.0, "ghi", 1.0)]);
    write_collection(input.path(), "b.json", at(1, 1, 0), vec![cell_feature("X", 0.0, "ghi", 2.0)]);

    let pipeline = Pipeline::new(quiet_config()).unwrap();
    let err = pipeline
        .integrate(Granularity::Day, AggregationMode::Sum, input.path(), output.path())
        .unwrap_err();
    assert_eq!(err.kind(), "OutOfOrderError");
    assert!(file_names(output.path()).is_empty());
}

#[test]
fn test_split_multi_timestep_file() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_hours(
        input.path(),
        "0-2.json",
        vec![
            vec![grid_feature(0, 0, 1.0)],
            vec![grid_feature(0, 0, 2.0)],
            vec![grid_feature(0, 0, 3.0)],
        ],
    );

    let pipeline = Pipeline::new(quiet_config()).unwrap();
    let summary = pipeline.split(input.path(), output.path()).unwrap();
    assert_eq!(summary.documents_out, 3);
    assert_eq!(
        file_names(output.path()),
        vec![
            "2007-01-01T000000.000Z".to_string(),
            "2007-01-01T010000.000Z".to_string(),
            "2007-01-01T020000.000Z".to_string(),
        ]
    );
    let documents = read_output(output.path());
    assert_relative_eq!(value_of(&documents[2], "0_0"), 3.0);
}

#[test]
fn test_parallel_read_matches_sequential() {
    let raw = tempdir().unwrap();
    let sequential = tempdir().unwrap();
    let parallel = tempdir().unwrap();
    write_raw_grid(raw.path());

    Pipeline::new(quiet_config())
        .unwrap()
        .integrate(Granularity::Day, AggregationMode::Sum, raw.path(), sequential.path())
        .unwrap();
    let config = PipelineConfig {
        parallel_read: true,
        workers: Some(2),
        ..quiet_config()
    };
    Pipeline::new(config)
        .unwrap()
        .integrate(Granularity::Day, AggregationMode::Sum, raw.path(), parallel.path())
        .unwrap();

    assert_eq!(file_names(sequential.path()), file_names(parallel.path()));
    let expected = read_output(sequential.path());
    let actual = read_output(parallel.path());
    assert_eq!(expected.len(), actual.len());
    for (a, b) in expected.iter().zip(&actual) {
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.cells, b.cells);
    }
}

#[test]
fn test_flushed_documents_survive_a_later_failure() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_collection(input.path(), "a.json", at(1, 1, 0), vec![cell_feature("X", 0.0, "ghi", 1.0)]);
    write_collection(input.path(), "b.json", at(1, 2, 0), vec![cell_feature("X", 0.0, "ghi", 2.0)]);
    fs::write(input.path().join("c.json"), "{\"type\": \"FeatureCollection\", \"features\": [").unwrap();

    let pipeline = Pipeline::new(quiet_config()).unwrap();
    let err = pipeline
        .integrate(Granularity::Day, AggregationMode::Sum, input.path(), output.path())
        .unwrap_err();
    assert_eq!(err.kind(), "MalformedDocumentError");
    assert!(err.artifact().ends_with("c.json"));

    // day 1 was closed by day 2 and written; day 2 was still open
    assert_eq!(file_names(output.path()), vec!["2007-01-01T000000.000Z".to_string()]);
    let documents = read_output(output.path());
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].timestamp, at(1, 1, 0));
    assert_relative_eq!(value_of(&documents[0], "X"), 3600.0, epsilon = 1e-9);
}

#[test]
fn test_hour_index_overflow_is_a_timestamp_error() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_hours(input.path(), "99999999999-0.json", vec![vec![grid_feature(0, 0, 1.0)]]);

    let pipeline = Pipeline::new(quiet_config()).unwrap();
    let err = pipeline
        .integrate(Granularity::Day, AggregationMode::Sum, input.path(), output.path())
        .unwrap_err();
    assert_eq!(err.kind(), "TimestampError");
    assert!(file_names(output.path()).is_empty());
}
