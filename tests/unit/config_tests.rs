//! 配置加载单元测试

use waveplus_bridge::config::{Settings, SmtpSecurity};
use waveplus_bridge::models::SensorSelection;
use waveplus_bridge::services::AlertEngine;
use waveplus_bridge::utils::parse_device_entry;

use crate::{assert_err, assert_ok};

const CONFIG: &str = r#"
devices:
  - "2931234567, office"
  - "2931234568 cellar"
data_retention: "48:00:00"
graph_decimations:
  - { age: "06:00:00", factor: 2 }
  - { age: 86400, factor: 10 }
alerts:
  - name: co2
    sources: ["office:co2", "cellar:co2"]
    trigger:
      above: [1000, 1500, 1000]
      for: 60
    actions:
      - print: { message: "CO2 %d %v" }
  - sources: "cellar:temperature"
    trigger: { below: 5 }
    actions: { print: {} }
smtp:
  server: smtp.example.com
  security: ssl
  port: 465
mqtt:
  host: broker.local
  topic: home/air
  publish:
    - { device: cellar, sensors: "*" }
    - { device: "*", sensors: [co2, temperature] }
"#;

#[test]
fn test_device_entry_separators() {
    for entry in ["2931234567, office", "2931234567:office", " 2931234567 ;office "] {
        let device = assert_ok!(parse_device_entry(entry));
        assert_eq!(device.serial, "2931234567");
        assert_eq!(device.nickname.as_deref(), Some("office"), "条目 {:?} 解析错误", entry);
    }

    let bare = assert_ok!(parse_device_entry("2931234567"));
    assert!(bare.nickname.is_none());

    assert_err!(parse_device_entry("29312345, office"));
    assert_err!(parse_device_entry("abcdefghij"));
}

#[test]
fn test_full_configuration() {
    let settings = assert_ok!(Settings::from_yaml(CONFIG));

    assert_eq!(settings.data_retention, 48 * 3600);
    let policy = assert_ok!(settings.decimation_policy());
    assert_eq!(policy.factor_for_age(3600), 1);
    assert_eq!(policy.factor_for_age(7 * 3600), 2);
    assert_eq!(policy.factor_for_age(2 * 86400), 10);

    let smtp = settings.smtp.as_ref().unwrap();
    assert_eq!(smtp.security, SmtpSecurity::Ssl);
    assert_eq!(smtp.port, 465);

    let mqtt = settings.mqtt.as_ref().unwrap();
    assert_eq!(mqtt.port, 1883);
    assert_eq!(mqtt.publish.len(), 2);
    assert_eq!(mqtt.publish[0].sensors, SensorSelection::Wildcard("*".to_string()));
}

#[test]
fn test_alert_engine_from_settings() {
    let settings = assert_ok!(Settings::from_yaml(CONFIG));
    let engine = assert_ok!(AlertEngine::from_settings(&settings));

    let rules = engine.rules();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].name, "co2");
    assert_eq!(rules[0].sources.len(), 2);
    assert_eq!(rules[0].trigger.thresholds(), &[1000.0, 1500.0], "阈值应排序去重");
    assert_eq!(rules[0].actions[0].template(), "CO2 %d %v");

    assert_eq!(rules[1].name, "alert-2");
    assert_eq!(
        rules[1].actions[0].template(),
        "Sensor alert: Sensor: %d.%s, Level: %v"
    );
}

#[test]
fn test_rejects_invalid_values() {
    // 抽稀因子为 0
    assert_err!(Settings::from_yaml(
        "devices: ['2931234567']\ngraph_decimations: [{ age: 60, factor: 0 }]"
    ));
    // 重复序列号
    assert_err!(Settings::from_yaml(
        "devices: ['2931234567', '2931234567, office']"
    ));
    // 未知传感器
    assert_err!(Settings::from_yaml(
        "devices: ['2931234567']\nalerts: [{ sources: '2931234567:noise', trigger: { above: 1 }, actions: { print: {} } }]"
    ));
    // 时长格式错误
    assert_err!(Settings::from_yaml("devices: ['2931234567']\nretry_delay: '00:61:00'"));
    // 序列号超出广播可表示的范围
    assert_err!(Settings::from_yaml("devices: ['4294967296, attic']"));
    // 周期超出范围
    assert_err!(Settings::from_yaml("devices: ['2931234567']\nperiod: 0"));
}
