//! Tests for error types

use prometheus_reservations::core::{
    AllocationError, CommandError, EngineError, ForeignDomainError, SchedulingError,
    ValidationError, ValueError,
};

#[test]
fn test_scheduling_error_display() {
    let err = SchedulingError::time_conflict("resource `ep-1` is already booked");
    assert_eq!(
        format!("{err}"),
        "time conflict: resource `ep-1` is already booked"
    );
}

#[test]
fn test_value_error_becomes_no_available_resource() {
    let err: SchedulingError = ValueError::NoValueAvailable {
        provider: "mcu".into(),
    }
    .into();
    assert_eq!(
        format!("{err}"),
        "no available resource: no value available from provider `mcu`"
    );
}

#[test]
fn test_only_unsupported_commands_skip_retries() {
    let unsupported = CommandError::Unsupported {
        command: "create_room".into(),
        connector: "mcu".into(),
    };
    let failed = CommandError::Failed {
        command: "create_room".into(),
        reason: "busy".into(),
    };
    assert!(!unsupported.is_retryable());
    assert!(failed.is_retryable());
}

#[test]
fn test_foreign_domain_error_keeps_source() {
    let err = ForeignDomainError::new("east", "https://east.example/api", "no answer within 5s");
    assert_eq!(
        format!("{err}"),
        "foreign domain `east` failed at https://east.example/api: no answer within 5s"
    );
    let wrapped: AllocationError = err.into();
    assert!(matches!(wrapped, AllocationError::ForeignDomain(_)));
}

#[test]
fn test_engine_error_wraps_validation() {
    let err: EngineError = ValidationError::InvalidCommand("delete_room".into()).into();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidCommand(_))
    ));
}
