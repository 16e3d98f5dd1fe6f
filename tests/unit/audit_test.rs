//! Tests for audit sink

use prometheus_reservations::core::{
    build_audit_event, AuditLevel, AuditSink, EntityRef, InMemoryAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        EntityRef::Request(1),
        "allocated",
        AuditLevel::Info,
        Some("root 4".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].entity, EntityRef::Request(1));
    assert_eq!(events[0].action, "allocated");
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(EntityRef::Executable(1), "started", AuditLevel::Info, None));
    sink.record(build_audit_event(EntityRef::Executable(2), "started", AuditLevel::Info, None));
    sink.record(build_audit_event(EntityRef::Executable(3), "failed", AuditLevel::Error, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].entity, EntityRef::Executable(2)); // First one popped
    assert_eq!(events[1].level, AuditLevel::Error);
}

#[test]
fn test_events_for_filters_by_entity() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event(EntityRef::Request(7), "allocated", AuditLevel::Info, None));
    sink.record(build_audit_event(EntityRef::Reservation(7), "foreign_release_failed", AuditLevel::Warning, None));
    sink.record(build_audit_event(EntityRef::Request(7), "request_deleted", AuditLevel::Info, None));

    let actions: Vec<_> = sink
        .events_for(&EntityRef::Request(7))
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec!["allocated", "request_deleted"]);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        EntityRef::Resource("mcu".into()),
        "registered",
        AuditLevel::Warning,
        Some("capacity lowered".to_string()),
    );
    let other = build_audit_event(EntityRef::Resource("mcu".into()), "registered", AuditLevel::Info, None);

    assert_ne!(event.event_id, other.event_id);
    assert_eq!(event.detail, Some("capacity lowered".to_string()));
    assert!(event.created_at <= other.created_at);
}
