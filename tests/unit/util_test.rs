//! Tests for utility functions

use chrono::{TimeZone, Utc};

use prometheus_reservations::util::{Priority, RequestId, Technology, TimeInterval};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_technology_display_matches_serde_names() {
    for technology in [Technology::H323, Technology::Sip, Technology::WebRtc] {
        let json = serde_json::to_value(technology).unwrap();
        assert_eq!(json, technology.to_string());
    }
    assert_eq!(Technology::WebRtc.to_string(), "web_rtc");
}

#[test]
fn test_interval_containment_is_half_open() {
    let at = |h| Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap();
    let outer = TimeInterval::new(at(9), at(12)).unwrap();
    let inner = TimeInterval::new(at(10), at(12)).unwrap();

    assert!(outer.contains(&inner));
    assert!(!inner.contains(&outer));
    assert!(outer.contains_instant(at(9)));
    assert!(!outer.contains_instant(at(12)));
    assert_eq!(outer.duration(), chrono::Duration::hours(3));
}

#[test]
fn test_interval_serde_shape() {
    let at = |h| Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap();
    let interval = TimeInterval::new(at(10), at(11)).unwrap();
    let json = serde_json::to_value(interval).unwrap();
    assert_eq!(json["start"], "2026-03-02T10:00:00Z");
    assert_eq!(json["end"], "2026-03-02T11:00:00Z");
}

#[test]
fn test_request_id() {
    let id: RequestId = 12345;
    assert_eq!(id, 12345);
}
