//! 预警引擎单元测试

use std::sync::{Arc, Mutex};

use waveplus_bridge::models::{AlertSource, AlertState, Direction, Trigger};
use waveplus_bridge::services::{AlertAction, AlertEngine, AlertRule, AlertSink};

use crate::helpers::{device, sample, OFFICE};

#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl AlertSink for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn dispatch(&self, rendered_message: String) {
        self.0.lock().unwrap().push(rendered_message);
    }
}

fn source() -> AlertSource {
    AlertSource::new("office", "co2")
}

fn engine(thresholds: Vec<f64>, for_secs: i64, min_interval: i64) -> AlertEngine {
    engine_with_actions(thresholds, for_secs, min_interval, vec![])
}

fn engine_with_actions(
    thresholds: Vec<f64>,
    for_secs: i64,
    min_interval: i64,
    actions: Vec<AlertAction>,
) -> AlertEngine {
    AlertEngine::new(vec![AlertRule {
        name: "co2".to_string(),
        sources: vec![source()],
        trigger: Trigger::new(Direction::Above, thresholds, for_secs, min_interval).unwrap(),
        actions,
    }])
}

/// 返回在给定时刻触发的事件时间
fn fire_times(engine: &mut AlertEngine, points: &[(i64, f64)]) -> Vec<i64> {
    points
        .iter()
        .filter_map(|(t, v)| engine.evaluate(0, &source(), *v, *t).map(|_| *t))
        .collect()
}

#[test]
fn test_debounce_fires_once_at_for_window() {
    let mut engine = engine(vec![100.0], 30, 600);
    let points: Vec<(i64, f64)> = (0..=40).step_by(5).map(|t| (t, 150.0)).collect();

    assert_eq!(fire_times(&mut engine, &points), vec![30], "应在第 30 秒触发且仅触发一次");
}

#[test]
fn test_dip_resets_debounce_timer() {
    let mut engine = engine(vec![100.0], 30, 600);
    let points = [
        (0, 150.0),
        (5, 150.0),
        (10, 50.0),
        (15, 150.0),
        (30, 150.0),
        (40, 150.0),
        (45, 150.0),
    ];

    assert_eq!(fire_times(&mut engine, &points), vec![45], "回落后计时应从第 15 秒重新开始");
}

#[test]
fn test_escalation_bypasses_min_interval() {
    let mut engine = engine(vec![100.0, 200.0], 0, 60);

    let first = engine.evaluate(0, &source(), 150.0, 0).expect("首次越限应立即触发");
    assert_eq!(first.level, 100.0);

    let escalated = engine.evaluate(0, &source(), 250.0, 5).expect("升级应立即触发");
    assert_eq!(escalated.level, 200.0);
    assert_eq!(escalated.severity, 1);
}

#[test]
fn test_same_level_suppressed_within_min_interval() {
    let mut engine = engine(vec![100.0, 200.0], 0, 60);
    assert!(engine.evaluate(0, &source(), 150.0, 0).is_some());

    assert!(engine.evaluate(0, &source(), 150.0, 30).is_none(), "间隔内不应重复触发");
    assert!(engine.evaluate(0, &source(), 150.0, 61).is_some(), "超过间隔后应再次触发");
}

#[test]
fn test_deescalation_is_silent_then_rise_is_escalation() {
    let mut engine = engine(vec![100.0, 200.0], 0, 60);
    assert!(engine.evaluate(0, &source(), 250.0, 0).is_some());
    assert!(engine.evaluate(0, &source(), 150.0, 10).is_none(), "降级不应触发");
    assert_eq!(
        engine.state(0, &source()),
        AlertState::Active { level: 0, last_fired_at: 0 }
    );
    assert!(engine.evaluate(0, &source(), 250.0, 20).is_some(), "再次升级应立即触发");
}

#[test]
fn test_below_direction_lower_is_more_severe() {
    let trigger = Trigger::new(Direction::Below, vec![20.0, 10.0], 0, 60).unwrap();
    assert_eq!(trigger.crossed_level(25.0), None);
    assert_eq!(trigger.crossed_level(15.0), Some(0));
    assert_eq!(trigger.crossed_level(5.0), Some(1));
    assert_eq!(trigger.threshold_for(1), 10.0);
}

#[test]
fn test_process_sample_dispatches_rendered_messages() {
    let recorder = Arc::new(Recorder::default());
    let action = AlertAction::new("Sensor: %d.%s, Level: %v", recorder.clone());
    let mut engine = engine_with_actions(vec![1000.0], 0, 60, vec![action]);
    let office = device(OFFICE, Some("office"));

    let events = engine.process_sample(&office, &sample(OFFICE, 100, &[("co2", 1200.0)]));

    assert_eq!(events.len(), 1);
    assert_eq!(
        recorder.0.lock().unwrap().as_slice(),
        ["Sensor: office.co2, Level: 1200"]
    );
}
