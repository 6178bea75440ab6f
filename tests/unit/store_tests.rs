//! 时序存储单元测试

use std::fs;
use std::path::PathBuf;

use waveplus_bridge::models::{DecimationPolicy, DecimationStep, Sample, SeriesFilter, TimeRange};
use waveplus_bridge::services::{SeriesStore, COLUMNS_TAG, LOG_TAG};
use waveplus_bridge::AppError;

use crate::helpers::{device, sample, series, CELLAR, OFFICE};

const HOUR: i64 = 3600;

fn log_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("samples.csv")
}

fn store(retention: i64, path: Option<PathBuf>) -> SeriesStore {
    SeriesStore::new(
        &[device(OFFICE, Some("office")), device(CELLAR, Some("cellar"))],
        retention,
        path,
    )
}

fn data_lines(path: &PathBuf) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[test]
fn test_eviction_keeps_log_complete() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    let store = store(HOUR, Some(path.clone()));

    for s in series(OFFICE, 0, 600, 20) {
        store.append(s).unwrap();
        let window = store.device_samples(OFFICE);
        let newest = window.last().unwrap().timestamp;
        assert!(
            window.iter().all(|s| newest - s.timestamp <= HOUR),
            "内存中不应保留超过保留时长的采样"
        );
    }

    assert_eq!(store.device_samples(OFFICE).len(), 7);
    assert_eq!(data_lines(&path).len(), 20, "日志应保留全部采样");
}

#[test]
fn test_log_write_failure_keeps_memory_sample() {
    let dir = tempfile::tempdir().unwrap();
    // 日志目录位置被普通文件占用
    let blocker = dir.path().join("log");
    fs::write(&blocker, "").unwrap();
    let path = blocker.join("samples.csv");
    let store = store(HOUR, Some(path.clone()));

    let first = sample(OFFICE, 100, &[("co2", 650.0)]);
    let err = store.append(first.clone()).unwrap_err();
    assert!(matches!(err, AppError::StorageError(_)), "unexpected error: {err:?}");
    assert_eq!(store.device_samples(OFFICE), vec![first.clone()], "写日志失败时内存采样应保留");

    // 恢复可写后继续记录
    fs::remove_file(&blocker).unwrap();
    let second = sample(OFFICE, 160, &[("co2", 700.0)]);
    store.append(second.clone()).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], format!("{LOG_TAG},version=1"));
    assert!(lines[1].starts_with(COLUMNS_TAG));
    assert_eq!(data_lines(&path).len(), 1);
    assert!(data_lines(&path)[0].starts_with(&format!("160,{OFFICE},")));
    assert_eq!(store.device_samples(OFFICE), vec![first, second]);
}

#[test]
fn test_restore_rebuilds_window_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);

    let written = {
        let store = store(HOUR, Some(path.clone()));
        let mut samples = series(OFFICE, 0, 600, 12);
        // 乱序到达
        samples.swap(10, 11);
        for s in &samples {
            store.append(s.clone()).unwrap();
        }
        samples.extend(series(CELLAR, 0, 900, 3));
        for s in series(CELLAR, 0, 900, 3) {
            store.append(s).unwrap();
        }
        samples
    };

    let restored = store(HOUR, Some(path));
    let report = restored.restore().unwrap();

    let mut expected: Vec<Sample> = written
        .iter()
        .filter(|s| s.device_id == OFFICE && s.timestamp >= 6600 - HOUR)
        .cloned()
        .collect();
    expected.sort_by_key(|s| s.timestamp);

    assert_eq!(restored.device_samples(OFFICE), expected);
    assert_eq!(restored.device_samples(CELLAR).len(), 3);
    assert_eq!(report.restored, expected.len() + 3);
    assert_eq!(report.expired, 12 - expected.len());
    assert_eq!(report.malformed, 0);
}

#[test]
fn test_restore_skips_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    fs::write(
        &path,
        format!(
            "{LOG_TAG},version=1\n\
             {COLUMNS_TAG},time,device,co2\n\
             100,{OFFICE},650\n\
             not-a-time,{OFFICE},700\n\
             200,{OFFICE}\n\
             300,{OFFICE},abc\n\
             400,{OFFICE},800\n"
        ),
    )
    .unwrap();

    let store = store(HOUR, Some(path));
    let report = store.restore().unwrap();

    assert_eq!(report.restored, 2);
    assert_eq!(report.malformed, 3);
    let values: Vec<f64> = store
        .device_samples(OFFICE)
        .iter()
        .filter_map(|s| s.get("co2"))
        .collect();
    assert_eq!(values, vec![650.0, 800.0]);
}

#[test]
fn test_new_columns_record_changes_later_lines_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    fs::write(
        &path,
        format!(
            "{LOG_TAG},version=1\n\
             {COLUMNS_TAG},time,device,co2\n\
             100,{OFFICE},650\n\
             {COLUMNS_TAG},time,device,voc,co2,noise\n\
             200,{OFFICE},80,700,3.1\n"
        ),
    )
    .unwrap();

    let store = store(HOUR, Some(path.clone()));
    store.restore().unwrap();

    let samples = store.device_samples(OFFICE);
    assert_eq!(samples[0], sample(OFFICE, 100, &[("co2", 650.0)]));
    // 未知列被忽略
    assert_eq!(samples[1], sample(OFFICE, 200, &[("voc", 80.0), ("co2", 700.0)]));

    // 追加时列定义与文件不同，应写入新的列定义而不改写旧内容
    store.append(sample(OFFICE, 300, &[("co2", 710.0)])).unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with(&format!("{LOG_TAG},version=1\n{COLUMNS_TAG},time,device,co2\n")));
    assert_eq!(content.matches(COLUMNS_TAG).count(), 3);
}

#[test]
fn test_foreign_log_is_backed_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    fs::write(&path, "time,co2\n1,2\n").unwrap();

    let store = store(HOUR, Some(path.clone()));
    assert_eq!(store.restore().unwrap().restored, 0);
    store.append(sample(OFFICE, 100, &[("co2", 650.0)])).unwrap();

    let backups = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
        .count();
    assert_eq!(backups, 1, "无法识别的日志应被备份");
    assert!(fs::read_to_string(&path).unwrap().starts_with(LOG_TAG));
}

#[test]
fn test_query_is_deterministic_and_decimated() {
    let store = store(10 * HOUR, None);
    for s in series(OFFICE, 0, 60, 120) {
        store.append(s).unwrap();
    }

    let policy = DecimationPolicy::new(vec![DecimationStep { age: HOUR, factor: 4 }]).unwrap();
    let range = TimeRange::until(119 * 60);
    let filter = SeriesFilter::from_globs(&["office:co2"]).unwrap();

    let first: Vec<Sample> = store.query(&filter, range, &policy).collect();
    let second: Vec<Sample> = store.query(&filter, range, &policy).collect();
    assert_eq!(first, second, "相同查询应得到相同结果");

    // 超过 1 小时的 59 个点抽稀为 15 个，其余 61 个保持原样
    assert_eq!(first.len(), 15 + 61);
    assert_eq!(first[0].timestamp, 0);
    assert_eq!(first[1].timestamp, 240);
    assert!(first.iter().all(|s| s.readings.keys().eq(["co2"])));
}

#[test]
fn test_export_csv() {
    let store = store(HOUR, None);
    store.append(sample(OFFICE, 60, &[("co2", 650.0), ("temperature", 21.375)])).unwrap();
    store.append(sample(CELLAR, 120, &[("radon_st", 120.0)])).unwrap();

    let csv = store
        .export_csv(&SeriesFilter::all(), TimeRange::until(180), &DecimationPolicy::none())
        .unwrap();
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(lines[0], "Time,office:temperature,office:co2,cellar:radon_st");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].ends_with(",21.38,650,"));
    assert!(lines[2].ends_with(",,,120"));
}
