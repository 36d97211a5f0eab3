use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use ufdur_dataset::{
    merge_periods, merge_periods_in_dir, CanonicalRow, Column, MergeError, MergeOptions,
    PeriodTable, QuarterSummary,
};
use ufdur_pivot::CacheValue;

fn row(qtr: &str, product: &str, equiv: &str) -> CanonicalRow {
    let mut row = CanonicalRow::backfilled();
    row[Column::Qtr] = CacheValue::from(qtr);
    row[Column::ProductName] = CacheValue::from(product);
    row[Column::ThirtyDayEquiv] = CacheValue::from(equiv);
    row[Column::Source] = CacheValue::from("MAIN");
    row
}

fn write_period(dir: &Path, name: &str, rows: Vec<CanonicalRow>) {
    let file = fs::File::create(dir.join(name)).unwrap();
    PeriodTable::new(rows).write_csv(file).unwrap();
}

fn seed_two_periods(dir: &Path) {
    write_period(
        dir,
        "FY24Q2_combined.csv",
        vec![row("FY24Q2", "DrugZ", "5")],
    );
    write_period(
        dir,
        "FY24Q1_combined.csv",
        vec![row("FY24Q1", "DrugX", "10"), row("FY24Q1", "DrugY", "bad")],
    );
}

#[test]
fn summary_counts_rows_and_sums_numeric_equivalents() {
    let tmp = tempfile::tempdir().unwrap();
    seed_two_periods(tmp.path());

    let report = merge_periods_in_dir(tmp.path(), &MergeOptions::default()).unwrap();
    assert_eq!(report.rows, 3);
    assert_eq!(
        report.summary.get("FY24Q1"),
        Some(&QuarterSummary {
            records: 2,
            thirty_day_equiv: 10.0
        })
    );
    assert_eq!(
        report.summary.get("FY24Q2"),
        Some(&QuarterSummary {
            records: 1,
            thirty_day_equiv: 5.0
        })
    );
    assert_eq!(
        report.summary.to_string(),
        "FY24Q1: 2 records, 10.00 30-Day Equiv\nFY24Q2: 1 records, 5.00 30-Day Equiv\n"
    );
}

#[test]
fn master_concatenates_in_file_name_order_and_keeps_cells_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    seed_two_periods(tmp.path());

    let report = merge_periods_in_dir(tmp.path(), &MergeOptions::default()).unwrap();
    assert_eq!(report.output_path, tmp.path().join("UFDUR_Master.csv"));
    assert_eq!(
        report.inputs,
        vec![
            tmp.path().join("FY24Q1_combined.csv"),
            tmp.path().join("FY24Q2_combined.csv"),
        ]
    );

    let master = fs::read_to_string(&report.output_path).unwrap();
    let lines: Vec<&str> = master.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Qtr,ClaimState,"));
    assert_eq!(lines[1], "FY24Q1,AGGREGATED,,,DrugX,,,,,,,,10,MAIN");
    assert_eq!(lines[2], "FY24Q1,AGGREGATED,,,DrugY,,,,,,,,bad,MAIN");
    assert_eq!(lines[3], "FY24Q2,AGGREGATED,,,DrugZ,,,,,,,,5,MAIN");
}

#[test]
fn merging_twice_is_byte_identical() {
    let tmp = tempfile::tempdir().unwrap();
    seed_two_periods(tmp.path());
    let output = tmp.path().join("UFDUR_Master.csv");

    let first_report = merge_periods(tmp.path(), &output, &MergeOptions::default()).unwrap();
    let first = fs::read(&output).unwrap();
    let second_report = merge_periods(tmp.path(), &output, &MergeOptions::default()).unwrap();
    let second = fs::read(&output).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_report, second_report);
}

#[test]
fn merging_nothing_leaves_existing_master_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("UFDUR_Master.csv");
    fs::write(&output, "previous master").unwrap();
    fs::write(tmp.path().join("readme.txt"), "not a period table").unwrap();

    let err = merge_periods(tmp.path(), &output, &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, MergeError::NoInputToMerge { .. }), "{err}");
    assert_eq!(fs::read_to_string(&output).unwrap(), "previous master");
}

#[test]
fn master_in_another_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let periods = tmp.path().join("processed");
    fs::create_dir(&periods).unwrap();
    seed_two_periods(&periods);

    let output = tmp.path().join("out").join("all_combined.csv");
    let report = merge_periods(&periods, &output, &MergeOptions::default()).unwrap();
    assert_eq!(report.inputs.len(), 2);
    assert!(output.is_file());
}

#[test]
fn older_period_files_with_drifted_headers_are_reprojected() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("FY23Q4_combined.csv"),
        "ProductName,Qtr,ThirtyDayEquiv\nDrugW,FY23Q4,2.5\n",
    )
    .unwrap();
    write_period(
        tmp.path(),
        "FY24Q1_combined.csv",
        vec![row("FY24Q1", "DrugX", "1")],
    );

    let report = merge_periods_in_dir(tmp.path(), &MergeOptions::default()).unwrap();
    let master = fs::read_to_string(&report.output_path).unwrap();
    assert_eq!(
        master.lines().nth(1),
        Some("FY23Q4,AGGREGATED,,,DrugW,,,,,,,,2.5,")
    );
    assert_eq!(report.summary.get("FY23Q4").map(|q| q.thirty_day_equiv), Some(2.5));
}

#[test]
fn period_file_without_qtr_fails_the_merge() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("bad_combined.csv"), "ProductName\nDrugX\n").unwrap();

    let err = merge_periods_in_dir(tmp.path(), &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, MergeError::InvalidPeriodTable { .. }), "{err}");
    assert!(!tmp.path().join("UFDUR_Master.csv").exists());
}

#[test]
fn missing_directory_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let err = merge_periods_in_dir(&tmp.path().join("nope"), &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, MergeError::MissingDirectory(_)), "{err}");
}
