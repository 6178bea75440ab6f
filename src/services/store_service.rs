//! 时序存储服务
//!
//! 每台设备一条按时间排序的内存序列，按保留时长淘汰；所有采样同步追加到
//! CSV 日志。日志只追加不改写，启动时回放以恢复内存窗口。
//!
//! 日志格式：
//!
//! ```text
//! #waveplus-log,version=1
//! #columns,time,device,humidity,radon_st,radon_lt,temperature,pressure,co2,voc,illuminance,battery
//! 1700000000,2931234567,45.5,120,98,21.37,1001.2,650,80,12,90
//! ```
//!
//! 列含义由其前最近一条 `#columns` 记录决定，缺失读数写为空。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::AppError;
use crate::models::{
    is_known_sensor, Device, DecimationPolicy, DeviceSnapshot, PublishSpec, Readings, Sample,
    SeriesFilter, TimeRange, SENSOR_NAMES,
};
use crate::utils::{format_csv_time, now_ts};

/// 日志首行标记
pub const LOG_TAG: &str = "#waveplus-log";
/// 日志格式版本
pub const LOG_VERSION: &str = "version=1";
/// 列定义记录标记
pub const COLUMNS_TAG: &str = "#columns";

const TIME_COLUMN: &str = "time";
const DEVICE_COLUMN: &str = "device";

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// 单台设备的序列
struct SeriesHandle {
    serial: String,
    nickname: Option<String>,
    /// 是否为配置中的设备（仅日志中出现的设备为 false）
    registered: bool,
    samples: RwLock<VecDeque<Sample>>,
}

impl SeriesHandle {
    fn new(serial: &str, nickname: Option<String>, registered: bool) -> Self {
        Self {
            serial: serial.to_string(),
            nickname,
            registered,
            samples: RwLock::new(VecDeque::new()),
        }
    }

    fn name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.serial)
    }
}

/// 恢复结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// 载入内存的采样数
    pub restored: usize,
    /// 超出保留时长而丢弃的采样数
    pub expired: usize,
    /// 无法解析而跳过的行数
    pub malformed: usize,
}

/// 时序存储
pub struct SeriesStore {
    retention: i64,
    log_path: Option<PathBuf>,
    columns: Vec<String>,
    /// 配置中的设备，按配置顺序
    registry: Vec<String>,
    series: RwLock<BTreeMap<String, Arc<SeriesHandle>>>,
    writer: Mutex<Option<LogWriter>>,
}

impl SeriesStore {
    pub fn new(devices: &[Device], retention: i64, log_path: Option<PathBuf>) -> Self {
        let mut series = BTreeMap::new();
        let mut registry = Vec::with_capacity(devices.len());
        for device in devices {
            registry.push(device.serial.clone());
            series.insert(
                device.serial.clone(),
                Arc::new(SeriesHandle::new(&device.serial, device.nickname.clone(), true)),
            );
        }

        let mut columns = vec![TIME_COLUMN.to_string(), DEVICE_COLUMN.to_string()];
        columns.extend(SENSOR_NAMES.iter().map(|s| s.to_string()));

        Self {
            retention,
            log_path,
            columns,
            registry,
            series: RwLock::new(series),
            writer: Mutex::new(None),
        }
    }

    pub fn retention(&self) -> i64 {
        self.retention
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    fn handle(&self, serial: &str) -> Option<Arc<SeriesHandle>> {
        read_lock(&self.series).get(serial).cloned()
    }

    fn handle_or_insert(&self, serial: &str) -> Arc<SeriesHandle> {
        if let Some(handle) = self.handle(serial) {
            return handle;
        }
        write_lock(&self.series)
            .entry(serial.to_string())
            .or_insert_with(|| Arc::new(SeriesHandle::new(serial, None, false)))
            .clone()
    }

    /// 追加一条采样
    ///
    /// 先写内存并淘汰过期数据，再同步写日志。日志写入失败时返回错误，
    /// 但内存中的采样保留。
    pub fn append(&self, sample: Sample) -> Result<(), AppError> {
        let handle = self.handle_or_insert(&sample.device_id);
        {
            let mut samples = write_lock(&handle.samples);
            insert_ordered(&mut samples, sample.clone());
            let evicted = evict_expired(&mut samples, self.retention);
            if evicted > 0 {
                tracing::debug!(serial = %handle.serial, evicted = evicted, "淘汰过期采样");
            }
        }

        self.write_log(&sample)
    }

    fn write_log(&self, sample: &Sample) -> Result<(), AppError> {
        let Some(path) = &self.log_path else {
            return Ok(());
        };

        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(LogWriter::open(path, &self.columns)?);
        }

        let result = match guard.as_mut() {
            Some(writer) => writer.append(sample, &self.columns),
            None => Ok(()),
        };
        if result.is_err() {
            // 下次追加时重新打开
            *guard = None;
        }
        result
    }

    /// 启动时回放日志，重建内存窗口
    pub fn restore(&self) -> Result<RestoreReport, AppError> {
        let mut report = RestoreReport::default();
        let Some(path) = &self.log_path else {
            return Ok(report);
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "采样日志不存在，跳过恢复");
            return Ok(report);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut columns: Option<Vec<String>> = None;
        let mut per_device: HashMap<String, Vec<Sample>> = HashMap::new();

        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(line = line + 1, error = %e, "日志行无法解析");
                    report.malformed += 1;
                    continue;
                }
            };

            if line == 0 {
                if !is_log_tag(&record) {
                    tracing::warn!(path = %path.display(), "采样日志格式无法识别，跳过恢复");
                    return Ok(report);
                }
                continue;
            }

            if record.get(0) == Some(COLUMNS_TAG) {
                columns = Some(record.iter().skip(1).map(str::to_string).collect());
                continue;
            }

            match columns.as_deref().and_then(|c| parse_record(&record, c)) {
                Some(sample) => per_device.entry(sample.device_id.clone()).or_default().push(sample),
                None => {
                    tracing::debug!(line = line + 1, "跳过无效日志行");
                    report.malformed += 1;
                }
            }
        }

        for (serial, mut samples) in per_device {
            samples.sort_by_key(|s| s.timestamp);
            let handle = self.handle_or_insert(&serial);
            let mut window = write_lock(&handle.samples);
            let before = window.len();
            for sample in samples {
                insert_ordered(&mut window, sample);
            }
            report.expired += evict_expired(&mut window, self.retention);
            report.restored += window.len().saturating_sub(before);
        }

        if report.malformed > 0 {
            tracing::warn!(malformed = report.malformed, "恢复时跳过了无效日志行");
        }
        tracing::info!(
            restored = report.restored,
            expired = report.expired,
            "采样日志恢复完成"
        );
        Ok(report)
    }

    /// 范围查询，按设备序列号顺序惰性产出
    pub fn query(
        &self,
        filter: &SeriesFilter,
        range: TimeRange,
        policy: &DecimationPolicy,
    ) -> SeriesQuery {
        let handles: Vec<Arc<SeriesHandle>> = read_lock(&self.series).values().cloned().collect();
        SeriesQuery {
            handles: handles.into_iter(),
            filter: filter.clone(),
            range,
            policy: policy.clone(),
            pending: Vec::new().into_iter(),
        }
    }

    /// 导出 CSV（按时间排序，首列为本地时间）
    pub fn export_csv(
        &self,
        filter: &SeriesFilter,
        range: TimeRange,
        policy: &DecimationPolicy,
    ) -> Result<String, AppError> {
        let mut samples: Vec<Sample> = self.query(filter, range, policy).collect();
        samples.sort_by_key(|s| s.timestamp);

        let names: HashMap<String, String> = read_lock(&self.series)
            .values()
            .map(|h| (h.serial.clone(), h.name().to_string()))
            .collect();

        // 列：设备（序列号序）× 传感器（固定顺序）
        let mut labels: Vec<(String, String)> = Vec::new();
        for sample in &samples {
            for sensor in sample.readings.keys() {
                let label = (sample.device_id.clone(), sensor.clone());
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
        }
        labels.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| sensor_rank(&a.1).cmp(&sensor_rank(&b.1))));

        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec!["Time".to_string()];
        header.extend(labels.iter().map(|(serial, sensor)| {
            let name = names.get(serial).map_or(serial.as_str(), String::as_str);
            format!("{}:{}", name, sensor)
        }));
        writer.write_record(&header)?;

        for sample in &samples {
            let mut row = Vec::with_capacity(labels.len() + 1);
            row.push(format_csv_time(sample.timestamp));
            for (serial, sensor) in &labels {
                let cell = if *serial == sample.device_id {
                    sample.get(sensor).map(format_csv_value).unwrap_or_default()
                } else {
                    String::new()
                };
                row.push(cell);
            }
            writer.write_record(&row)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::InternalError(format!("CSV 缓冲区写入失败: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::InternalError(e.to_string()))
    }

    /// 所有已配置设备的最新数据
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.registry
            .iter()
            .filter_map(|serial| self.handle(serial))
            .filter(|h| h.registered)
            .map(|h| {
                let samples = read_lock(&h.samples);
                let latest = samples.back();
                DeviceSnapshot {
                    serial: h.serial.clone(),
                    name: h.name().to_string(),
                    readings: latest.map(|s| s.readings.clone()).unwrap_or_default(),
                    update_time: latest.map(|s| s.timestamp),
                }
            })
            .collect()
    }

    /// 按发布规则过滤后的最新数据
    pub fn publish_snapshot(&self, spec: &PublishSpec) -> Vec<DeviceSnapshot> {
        self.snapshot()
            .into_iter()
            .filter_map(|mut snap| {
                let selection = spec.selection_for(&snap.serial, &snap.name)?;
                snap.readings.retain(|sensor, _| selection.includes(sensor));
                Some(snap)
            })
            .collect()
    }

    /// 某台设备内存中的全部采样
    pub fn device_samples(&self, serial: &str) -> Vec<Sample> {
        self.handle(serial)
            .map(|h| read_lock(&h.samples).iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 内存中的采样总数
    pub fn record_count(&self) -> usize {
        read_lock(&self.series)
            .values()
            .map(|h| read_lock(&h.samples).len())
            .sum()
    }

    /// 已配置设备数
    pub fn device_count(&self) -> usize {
        self.registry.len()
    }
}

/// 惰性查询结果
///
/// 每到达一台设备时在其读锁内取出该设备的结果。
pub struct SeriesQuery {
    handles: std::vec::IntoIter<Arc<SeriesHandle>>,
    filter: SeriesFilter,
    range: TimeRange,
    policy: DecimationPolicy,
    pending: std::vec::IntoIter<Sample>,
}

impl SeriesQuery {
    fn collect_device(&self, handle: &SeriesHandle) -> Vec<Sample> {
        let samples = read_lock(&handle.samples);
        let mut out = Vec::new();
        let mut section_factor = 0;
        let mut index_in_section = 0usize;

        for sample in samples.iter().filter(|s| self.range.contains(s.timestamp)) {
            let factor = self.policy.factor_for_age(self.range.end - sample.timestamp);
            if factor != section_factor {
                section_factor = factor;
                index_in_section = 0;
            }
            // 每个抽稀桶取第一个点
            let keep = index_in_section % factor == 0;
            index_in_section += 1;
            if !keep {
                continue;
            }

            let readings = self.filter.restrict(&handle.serial, handle.name(), &sample.readings);
            if !readings.is_empty() {
                out.push(Sample::new(handle.serial.clone(), sample.timestamp, readings));
            }
        }
        out
    }
}

impl Iterator for SeriesQuery {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        loop {
            if let Some(sample) = self.pending.next() {
                return Some(sample);
            }
            let handle = self.handles.next()?;
            self.pending = self.collect_device(&handle).into_iter();
        }
    }
}

/// 保持时间顺序插入；时间戳相同的排在已有记录之后
fn insert_ordered(samples: &mut VecDeque<Sample>, sample: Sample) {
    match samples.back() {
        Some(last) if last.timestamp > sample.timestamp => {
            let pos = samples.partition_point(|s| s.timestamp <= sample.timestamp);
            samples.insert(pos, sample);
        }
        _ => samples.push_back(sample),
    }
}

/// 淘汰早于 `最新时间 - retention` 的采样，返回淘汰数量
fn evict_expired(samples: &mut VecDeque<Sample>, retention: i64) -> usize {
    let Some(newest) = samples.back().map(|s| s.timestamp) else {
        return 0;
    };
    let cutoff = newest.saturating_sub(retention);
    let mut evicted = 0;
    while samples.front().is_some_and(|s| s.timestamp < cutoff) {
        samples.pop_front();
        evicted += 1;
    }
    evicted
}

fn sensor_rank(sensor: &str) -> usize {
    SENSOR_NAMES
        .iter()
        .position(|s| *s == sensor)
        .unwrap_or(SENSOR_NAMES.len())
}

/// CSV 导出数值：最多两位小数，去掉多余的零
fn format_csv_value(value: f64) -> String {
    let s = format!("{:.2}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn is_log_tag(record: &csv::StringRecord) -> bool {
    record.get(0) == Some(LOG_TAG) && record.get(1) == Some(LOG_VERSION)
}

/// 按列定义解析一条数据记录
fn parse_record(record: &csv::StringRecord, columns: &[String]) -> Option<Sample> {
    if record.len() != columns.len() {
        return None;
    }

    let mut timestamp = None;
    let mut device = None;
    let mut readings = Readings::new();

    for (column, field) in columns.iter().zip(record.iter()) {
        match column.as_str() {
            TIME_COLUMN => timestamp = Some(field.trim().parse::<i64>().ok()?),
            DEVICE_COLUMN => {
                let serial = field.trim();
                if serial.is_empty() {
                    return None;
                }
                device = Some(serial.to_string());
            }
            sensor if is_known_sensor(sensor) => {
                let field = field.trim();
                if !field.is_empty() {
                    let value = field.parse::<f64>().ok().filter(|v| v.is_finite())?;
                    readings.insert(sensor.to_string(), value);
                }
            }
            // 未知列
            _ => {}
        }
    }

    Some(Sample::new(device?, timestamp?, readings))
}

/// 日志写入器
struct LogWriter {
    writer: csv::Writer<File>,
}

impl LogWriter {
    /// 打开日志；新文件写入标记与列定义，列定义变化时追加新的 `#columns`
    fn open(path: &Path, columns: &[String]) -> Result<Self, AppError> {
        let mut write_tag = true;
        let mut write_columns = true;

        if fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false) {
            match last_columns(path)? {
                Some(existing) => {
                    write_tag = false;
                    write_columns = existing.as_deref() != Some(columns);
                    terminate_partial_line(path)?;
                }
                None => backup_foreign_log(path)?,
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);

        if write_tag {
            writer.write_record([LOG_TAG, LOG_VERSION])?;
        }
        if write_columns {
            let mut record = vec![COLUMNS_TAG.to_string()];
            record.extend(columns.iter().cloned());
            writer.write_record(&record)?;
            tracing::info!(path = %path.display(), "写入日志列定义");
        }
        writer.flush()?;

        Ok(Self { writer })
    }

    fn append(&mut self, sample: &Sample, columns: &[String]) -> Result<(), AppError> {
        let record: Vec<String> = columns
            .iter()
            .map(|column| match column.as_str() {
                TIME_COLUMN => sample.timestamp.to_string(),
                DEVICE_COLUMN => sample.device_id.clone(),
                sensor => sample.get(sensor).map(|v| v.to_string()).unwrap_or_default(),
            })
            .collect();
        self.writer.write_record(&record)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// 读取已有日志的最后一条列定义
///
/// 返回 `None` 表示首行标记无法识别；`Some(None)` 表示已识别但没有列定义。
fn last_columns(path: &Path) -> Result<Option<Option<Vec<String>>>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut records = reader.records();
    match records.next() {
        Some(Ok(first)) if is_log_tag(&first) => {}
        _ => return Ok(None),
    }

    let mut columns = None;
    for record in records.flatten() {
        if record.get(0) == Some(COLUMNS_TAG) {
            columns = Some(record.iter().skip(1).map(str::to_string).collect());
        }
    }
    Ok(Some(columns))
}

/// 上次写入中断留下的半行补上换行，避免与新记录粘连
fn terminate_partial_line(path: &Path) -> Result<(), AppError> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        tracing::warn!(path = %path.display(), "日志末行不完整，补齐换行");
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// 备份无法识别的日志文件
fn backup_foreign_log(path: &Path) -> Result<(), AppError> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".{}.bak", now_ts()));
    let backup = PathBuf::from(backup);
    fs::rename(path, &backup)?;
    tracing::warn!(
        path = %path.display(),
        backup = %backup.display(),
        "日志格式无法识别，已备份并新建"
    );
    Ok(())
}
