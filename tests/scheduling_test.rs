//! Allocation behavior of the scheduler against the in-memory store.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{actions, at, audited, interval, registry};
use prometheus_reservations::config::CandidateRanking;
use prometheus_reservations::core::{
    AllocationError, Capability, Capacity, EntityRef, EventKind, LifecycleEvent,
    NotificationDispatcher, NotificationExecutor, Reporter, RequestState, Reservation,
    ReservationKind, ReservationRequest, Resource, ResourceRegistry, Scheduler,
    SchedulerPassReport, SchedulingErrorKind, Specification, Store,
};
use prometheus_reservations::util::{Priority, Technology, TimeInterval};

fn scheduler() -> Scheduler {
    Scheduler::new(Store::in_memory(), registry())
}

fn endpoint_request(interval: TimeInterval) -> ReservationRequest {
    ReservationRequest::new(
        "alice",
        interval,
        Specification::Resource {
            resource_id: "ep-1".into(),
        },
    )
}

fn room_request(interval: TimeInterval, participants: u32) -> ReservationRequest {
    ReservationRequest::new(
        "alice",
        interval,
        Specification::Room {
            technology: Technology::H323,
            participant_count: participants,
            aliases: vec![],
            recorded: false,
        },
    )
}

fn value_request(interval: TimeInterval) -> ReservationRequest {
    ReservationRequest::new(
        "alice",
        interval,
        Specification::Value {
            provider_id: Some("mcu".into()),
            requested: None,
        },
    )
}

async fn submit(scheduler: &Scheduler, request: ReservationRequest) -> Result<u64, AllocationError> {
    let request = scheduler.create_request(request).unwrap();
    scheduler.allocate(request.id).await
}

fn scheduling_kind(err: &AllocationError) -> SchedulingErrorKind {
    match err {
        AllocationError::Scheduling(err) => err.kind,
        other => panic!("expected a scheduling error, got {other:?}"),
    }
}

fn values(nodes: &[Reservation]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| n.kind.provided_value().map(|(_, v)| v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_exclusive_resource_conflicts_on_overlap() {
    let scheduler = scheduler();
    submit(&scheduler, endpoint_request(interval((10, 0), (11, 0))))
        .await
        .unwrap();

    let second = scheduler
        .create_request(endpoint_request(interval((10, 30), (11, 30))))
        .unwrap();
    let err = scheduler.allocate(second.id).await.unwrap_err();
    assert_eq!(scheduling_kind(&err), SchedulingErrorKind::TimeConflict);

    let stored = scheduler.store().requests.load(second.id).unwrap();
    assert_eq!(stored.state, RequestState::AllocationFailed);
    assert!(stored.reservation_id.is_none());
    assert!(stored.report.unwrap().contains("time conflict"));
}

#[tokio::test]
async fn test_back_to_back_intervals_do_not_conflict() {
    let scheduler = scheduler();
    submit(&scheduler, endpoint_request(interval((10, 0), (11, 0))))
        .await
        .unwrap();
    submit(&scheduler, endpoint_request(interval((11, 0), (12, 0))))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_resource_has_no_candidate() {
    let scheduler = scheduler();
    let err = submit(
        &scheduler,
        ReservationRequest::new(
            "alice",
            interval((10, 0), (11, 0)),
            Specification::Resource {
                resource_id: "ghost".into(),
            },
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(scheduling_kind(&err), SchedulingErrorKind::NoAvailableResource);
}

#[tokio::test]
async fn test_next_free_value_skips_overlapping_allocation() {
    let scheduler = scheduler();
    let first = submit(&scheduler, value_request(interval((10, 0), (11, 0))))
        .await
        .unwrap();
    let second = submit(&scheduler, value_request(interval((10, 30), (11, 30))))
        .await
        .unwrap();
    let later = submit(&scheduler, value_request(interval((12, 0), (13, 0))))
        .await
        .unwrap();

    let store = scheduler.store();
    assert_eq!(values(&store.tree(first).unwrap()), vec!["9501"]);
    assert_eq!(values(&store.tree(second).unwrap()), vec!["9502"]);
    // Disjoint interval reuses the first value.
    assert_eq!(values(&store.tree(later).unwrap()), vec!["9501"]);
}

#[tokio::test]
async fn test_requested_value_in_use_is_a_time_conflict() {
    let scheduler = scheduler();
    submit(&scheduler, value_request(interval((10, 0), (11, 0))))
        .await
        .unwrap();
    let err = submit(
        &scheduler,
        ReservationRequest::new(
            "bob",
            interval((10, 0), (11, 0)),
            Specification::Value {
                provider_id: Some("mcu".into()),
                requested: Some("9501".into()),
            },
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(scheduling_kind(&err), SchedulingErrorKind::TimeConflict);
}

#[tokio::test]
async fn test_limited_capacity_counts_peak_usage() {
    let scheduler = scheduler();
    submit(&scheduler, room_request(interval((10, 0), (11, 0)), 6))
        .await
        .unwrap();
    submit(&scheduler, room_request(interval((11, 0), (12, 0)), 6))
        .await
        .unwrap();
    // Overlaps both, but each only adds up to 10.
    submit(&scheduler, room_request(interval((10, 30), (11, 30)), 4))
        .await
        .unwrap();

    let err = submit(&scheduler, room_request(interval((10, 45), (11, 15)), 1))
        .await
        .unwrap_err();
    assert_eq!(scheduling_kind(&err), SchedulingErrorKind::TimeConflict);
}

#[tokio::test]
async fn test_room_larger_than_any_resource_is_unavailable() {
    let scheduler = scheduler();
    let err = submit(&scheduler, room_request(interval((10, 0), (11, 0)), 11))
        .await
        .unwrap_err();
    assert_eq!(scheduling_kind(&err), SchedulingErrorKind::NoAvailableResource);
}

#[tokio::test]
async fn test_room_tree_carries_alias_and_recording() {
    let scheduler = scheduler();
    let root = submit(
        &scheduler,
        ReservationRequest::new(
            "alice",
            interval((10, 0), (11, 0)),
            Specification::Room {
                technology: Technology::H323,
                participant_count: 5,
                aliases: vec![Technology::H323],
                recorded: true,
            },
        ),
    )
    .await
    .unwrap();

    let summary = scheduler.store().summary(root).unwrap();
    assert!(matches!(
        summary.kind,
        ReservationKind::Room { ref resource_id, participant_count: 5, .. } if resource_id == "mcu"
    ));
    assert_eq!(summary.children.len(), 2);

    let alias = &summary.children[0];
    let ReservationKind::Alias { aliases, .. } = &alias.kind else {
        panic!("expected alias child, got {:?}", alias.kind);
    };
    assert_eq!(aliases[0].value, "+4209501");
    assert!(matches!(
        alias.children[0].kind,
        ReservationKind::Value { ref value, .. } if value == "9501"
    ));
    assert!(matches!(
        summary.children[1].kind,
        ReservationKind::Recording { ref resource_id } if resource_id == "recorder"
    ));
}

#[tokio::test]
async fn test_failed_modification_keeps_previous_tree() {
    let scheduler = scheduler();
    let request = scheduler
        .create_request(room_request(interval((10, 0), (11, 0)), 4))
        .unwrap();
    let root = scheduler.allocate(request.id).await.unwrap();

    scheduler
        .modify_request(
            request.id,
            interval((12, 0), (13, 0)),
            Specification::Room {
                technology: Technology::H323,
                participant_count: 50,
                aliases: vec![],
                recorded: false,
            },
        )
        .await
        .unwrap();
    assert!(scheduler.allocate(request.id).await.is_err());

    let stored = scheduler.store().requests.load(request.id).unwrap();
    assert_eq!(stored.state, RequestState::AllocationFailed);
    assert_eq!(stored.reservation_id, Some(root));
    assert!(stored.pending.is_none());
    assert_eq!(stored.interval, interval((10, 0), (11, 0)));
    assert_eq!(stored.specification, request.specification);

    let kept = scheduler.store().reservations.get(root).unwrap();
    assert!(stored.interval.contains(&kept.interval));
}

#[tokio::test]
async fn test_successful_modification_migrates_and_releases_old_tree() {
    let scheduler = scheduler();
    let request = scheduler
        .create_request(room_request(interval((10, 0), (11, 0)), 4))
        .unwrap();
    let old_root = scheduler.allocate(request.id).await.unwrap();

    // Growing to the full capacity only fits when the old usage is ignored.
    scheduler
        .modify_request(
            request.id,
            interval((10, 0), (11, 30)),
            Specification::Room {
                technology: Technology::H323,
                participant_count: 10,
                aliases: vec![],
                recorded: false,
            },
        )
        .await
        .unwrap();
    let waiting = scheduler.store().requests.load(request.id).unwrap();
    assert_eq!(waiting.interval, interval((10, 0), (11, 0)));
    assert!(waiting.pending.is_some());

    let new_root = scheduler.allocate(request.id).await.unwrap();

    assert_ne!(new_root, old_root);
    let store = scheduler.store();
    let stored = store.requests.load(request.id).unwrap();
    assert_eq!(stored.interval, interval((10, 0), (11, 30)));
    assert!(stored.pending.is_none());
    assert!(store.reservations.get(old_root).is_none());
    let root = store.reservations.load(new_root).unwrap();
    assert_eq!(root.migrate_from, Some(old_root));
    assert_eq!(root.interval, interval((10, 0), (11, 30)));
}

#[tokio::test]
async fn test_allocate_is_idempotent_once_allocated() {
    let scheduler = scheduler();
    let request = scheduler
        .create_request(room_request(interval((10, 0), (11, 0)), 2))
        .unwrap();
    let root = scheduler.allocate(request.id).await.unwrap();
    assert_eq!(scheduler.allocate(request.id).await.unwrap(), root);
    assert_eq!(scheduler.store().reservations.find(&|_| true).len(), 1);
}

#[tokio::test]
async fn test_pass_allocates_new_requests_and_expires_past_ones() {
    let (sink, reporter) = audited();
    let scheduler = scheduler().with_reporter(reporter);
    let live = scheduler
        .create_request(room_request(interval((10, 0), (11, 0)), 2))
        .unwrap();
    let past = scheduler
        .create_request(room_request(interval((8, 0), (9, 0)), 2))
        .unwrap();

    let report = scheduler.run_pass(at(9, 30)).await;
    assert_eq!(report.allocated, vec![live.id]);
    assert_eq!(report.failed, vec![past.id]);

    let expired = scheduler.store().requests.load(past.id).unwrap();
    assert_eq!(expired.state, RequestState::AllocationFailed);
    assert_eq!(actions(&sink, &EntityRef::Request(live.id)), vec!["allocated"]);
    assert_eq!(
        actions(&sink, &EntityRef::Request(past.id)),
        vec!["allocation_failed"]
    );

    // Nothing left to do.
    assert_eq!(scheduler.run_pass(at(9, 31)).await, SchedulerPassReport::default());
}

#[tokio::test]
async fn test_least_utilized_ranking_spreads_rooms() {
    let registry = ResourceRegistry::new();
    for id in ["mcu-a", "mcu-b"] {
        registry
            .register(
                Resource::new(id, Capacity::Limited(10))
                    .with_priority(Priority::High)
                    .with_capability(Capability::Room {
                        technologies: vec![Technology::Sip],
                    }),
            )
            .unwrap();
    }
    let scheduler = Scheduler::new(Store::in_memory(), Arc::new(registry))
        .with_ranking(CandidateRanking::LeastUtilized);

    let sip_room = |participants| {
        ReservationRequest::new(
            "alice",
            interval((10, 0), (11, 0)),
            Specification::Room {
                technology: Technology::Sip,
                participant_count: participants,
                aliases: vec![],
                recorded: false,
            },
        )
    };
    let first = submit(&scheduler, sip_room(3)).await.unwrap();
    let second = submit(&scheduler, sip_room(3)).await.unwrap();

    let room_of = |root| match scheduler.store().reservations.load(root).unwrap().kind {
        ReservationKind::Room { resource_id, .. } => resource_id,
        other => panic!("expected room, got {other:?}"),
    };
    assert_eq!(room_of(first), "mcu-a");
    assert_eq!(room_of(second), "mcu-b");
}

#[tokio::test]
async fn test_existing_reservation_is_reused_once() {
    let scheduler = scheduler();
    let host = submit(&scheduler, room_request(interval((9, 0), (12, 0)), 4))
        .await
        .unwrap();

    let reuse = |iv| {
        ReservationRequest::new(
            "bob",
            iv,
            Specification::Existing {
                reservation_id: host,
            },
        )
    };
    let root = submit(&scheduler, reuse(interval((10, 0), (11, 0))))
        .await
        .unwrap();
    assert!(matches!(
        scheduler.store().reservations.load(root).unwrap().kind,
        ReservationKind::Existing { reused_id } if reused_id == host
    ));

    let err = submit(&scheduler, reuse(interval((10, 30), (11, 30))))
        .await
        .unwrap_err();
    assert_eq!(scheduling_kind(&err), SchedulingErrorKind::TimeConflict);

    // Not covered by the reused reservation.
    let err = submit(&scheduler, reuse(interval((11, 30), (12, 30))))
        .await
        .unwrap_err();
    assert_eq!(scheduling_kind(&err), SchedulingErrorKind::NoAvailableResource);
}

#[tokio::test]
async fn test_deleted_request_cannot_be_allocated_or_modified() {
    let scheduler = scheduler();
    let request = scheduler
        .create_request(room_request(interval((10, 0), (11, 0)), 2))
        .unwrap();
    let root = scheduler.allocate(request.id).await.unwrap();

    scheduler.delete_request(request.id).await.unwrap();
    // Second delete is a no-op.
    scheduler.delete_request(request.id).await.unwrap();

    assert!(scheduler.store().reservations.get(root).is_none());
    assert!(matches!(
        scheduler.allocate(request.id).await,
        Err(AllocationError::Validation(_))
    ));
    assert!(scheduler
        .modify_request(request.id, interval((10, 0), (11, 0)), request.specification)
        .await
        .is_err());
}

#[tokio::test]
async fn test_random_bookings_never_overbook() {
    let scheduler = scheduler();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..60 {
        let start = rng.random_range(8..16);
        let length = rng.random_range(1..4);
        let participants = rng.random_range(1..6);
        let _ = submit(
            &scheduler,
            room_request(interval((start, 0), (start + length, 0)), participants),
        )
        .await;
        let _ = submit(
            &scheduler,
            endpoint_request(interval((start, 30), (start + length, 0))),
        )
        .await;
    }

    let all = scheduler.store().reservations.find(&|_| true);
    let endpoint: Vec<_> = all
        .iter()
        .filter(|r| matches!(&r.kind, ReservationKind::Resource { resource_id, .. } if resource_id == "ep-1"))
        .collect();
    for (i, a) in endpoint.iter().enumerate() {
        for b in &endpoint[i + 1..] {
            assert!(!a.interval.overlaps(&b.interval), "{} overlaps {}", a.interval, b.interval);
        }
    }

    // Sample every quarter hour for the room capacity.
    for quarter in 0..(12 * 4) {
        let instant = at(8 + quarter / 4, (quarter % 4) * 15);
        let used: u32 = all
            .iter()
            .filter(|r| r.interval.contains_instant(instant))
            .filter_map(|r| match &r.kind {
                ReservationKind::Room { participant_count, .. } => Some(*participant_count),
                _ => None,
            })
            .sum();
        assert!(used <= 10, "{used} licenses in use at {instant}");
    }
}

#[derive(Default)]
struct Inbox(Mutex<Vec<LifecycleEvent>>);

impl NotificationExecutor for Inbox {
    fn dispatch(&self, event: &LifecycleEvent) {
        self.0.lock().push(event.clone());
    }
}

#[tokio::test]
async fn test_owner_is_notified_of_outcomes() {
    let inbox = Arc::new(Inbox::default());
    let reporter = Reporter::new()
        .with_notifications(NotificationDispatcher::new().with_executor(inbox.clone()));
    let scheduler = scheduler().with_reporter(reporter);

    let ok = submit(&scheduler, room_request(interval((10, 0), (11, 0)), 2)).await;
    let failed = submit(&scheduler, room_request(interval((10, 0), (11, 0)), 20)).await;
    assert!(ok.is_ok() && failed.is_err());

    let events = inbox.0.lock();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::RequestAllocated, EventKind::AllocationFailed]);
    assert!(events.iter().all(|e| e.recipients == vec!["alice".to_string()]));
    assert!(events[1].detail.is_some());
}
