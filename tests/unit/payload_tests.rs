//! 数据帧解码单元测试

use waveplus_bridge::ble::{
    decode_sensor_payload, encode_manufacturer_data, parse_manufacturer_serial, UNAVAILABLE_U16,
};
use waveplus_bridge::DeviceError;

use crate::mocks::{default_frame, sensor_frame};

#[test]
fn test_co2_sentinel_is_omitted() {
    let frame = sensor_frame(91, [120, 98, 2137, 50060, UNAVAILABLE_U16, 80]);
    let readings = decode_sensor_payload(&frame).unwrap();

    assert!(!readings.contains_key("co2"), "CO2 不可用时不应出现");
    assert_eq!(readings.len(), 6);
    assert_eq!(readings["humidity"], 45.5);
    assert_eq!(readings["radon_st"], 120.0);
    assert_eq!(readings["radon_lt"], 98.0);
    assert_eq!(readings["temperature"], 21.37);
    assert_eq!(readings["pressure"], 1001.2);
    assert_eq!(readings["voc"], 80.0);
}

#[test]
fn test_radon_out_of_range_is_omitted() {
    let frame = sensor_frame(91, [16384, 16383, 2137, 50060, 650, 80]);
    let readings = decode_sensor_payload(&frame).unwrap();

    assert!(!readings.contains_key("radon_st"));
    assert_eq!(readings["radon_lt"], 16383.0);
}

#[test]
fn test_short_frame_is_decode_error() {
    let frame = default_frame();
    let err = decode_sensor_payload(&frame[..12]).unwrap_err();
    assert!(matches!(err, DeviceError::Decode(_)));
}

#[test]
fn test_manufacturer_serial() {
    let data = encode_manufacturer_data(2931234567);
    assert_eq!(parse_manufacturer_serial(&data).as_deref(), Some("2931234567"));

    // 其他厂商
    let mut foreign = data.clone();
    foreign[0] = 0x4C;
    foreign[1] = 0x00;
    assert_eq!(parse_manufacturer_serial(&foreign), None);

    // 长度不符
    assert_eq!(parse_manufacturer_serial(&data[..6]), None);
}
