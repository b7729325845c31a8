use super::*;

#[test]
fn test_reading_accepts_original_field_name() {
    let raw = r#"{"deviceaddress":"abc","gyro":{"x":0.1,"y":0.2,"z":0.3}}"#;
    let reading: Reading = serde_json::from_str(raw).unwrap();

    assert_eq!(reading.device_id, "abc");
    assert_eq!(reading.gyro, Axes::new(0.1, 0.2, 0.3));
    assert!(reading.accel.is_none());
}

#[test]
fn test_reading_ignores_producer_sequence() {
    let raw = r#"{"device_id":"abc","sequence":99,"timestamp":1,"gyro":{"x":0,"y":0,"z":0}}"#;
    let reading: Reading = serde_json::from_str(raw).unwrap();
    let record = TelemetryRecord::from_reading(reading, 7, Utc::now());

    assert_eq!(record.sequence, 7);
}

#[test]
fn test_validate_trims_device_id() {
    let reading = Reading {
        device_id: "  abc ".into(),
        gyro: Axes::new(1.0, 2.0, 3.0),
        accel: None,
    };

    assert_eq!(reading.validate().unwrap().device_id, "abc");
}

#[test]
fn test_validate_rejects_blank_device() {
    let reading = Reading {
        device_id: "   ".into(),
        gyro: Axes::new(1.0, 2.0, 3.0),
        accel: None,
    };

    assert_eq!(reading.validate(), Err(ReadingError::EmptyDevice));
}

#[test]
fn test_validate_rejects_non_finite_accel() {
    let reading = Reading {
        device_id: "abc".into(),
        gyro: Axes::new(1.0, 2.0, 3.0),
        accel: Some(Axes::new(f64::NAN, 0.0, 0.0)),
    };

    assert_eq!(reading.validate(), Err(ReadingError::NonFinite("accel")));
}

#[test]
fn test_record_serializes_received_at_as_rfc3339() {
    let at = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let record = TelemetryRecord {
        device_id: "abc".into(),
        gyro: Axes::new(0.0, 0.0, 0.0),
        accel: None,
        sequence: 1,
        received_at: at,
    };

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["received_at"], "2024-05-01T12:00:00Z");
    assert!(json.get("accel").is_none());
}
