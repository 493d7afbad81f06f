//! End-to-end attendance flows through the manager with an in-memory store.

use chrono::{Duration, TimeZone, Utc};
use rollcall::store::memory::MemoryStore;
use rollcall::store::AttendanceStore;
use rollcall::{
    AttendanceError, AttendanceManager, AttendanceStatus, Clock, Coordinates, CourseId,
    CreateSessionRequest, EngineConfig, MockClock, Presenter, Principal, ScanRequest, ScanResult,
    SessionEvent, Stores,
};
use std::sync::Arc;
use uuid::Uuid;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

struct Harness {
    manager: Arc<AttendanceManager>,
    store: Arc<MemoryStore>,
    clock: MockClock,
    course: CourseId,
    prof: Principal,
}

fn harness(students: &[&str]) -> Harness {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 2, 10, 10, 0, 0).unwrap());
    let store = Arc::new(MemoryStore::new());
    let course = Uuid::new_v4();
    store.add_course(course, "prof");
    for student in students {
        store.enroll(course, *student);
    }

    let manager = AttendanceManager::new_with_clock(
        EngineConfig::new(SECRET),
        Stores::from_backend(store.clone()),
        Arc::new(clock.clone()),
    )
    .unwrap();

    Harness {
        manager: Arc::new(manager),
        store,
        clock,
        course,
        prof: Principal::instructor("prof"),
    }
}

impl Harness {
    async fn scan(&self, student: &str, session_id: Uuid, token: String) -> rollcall::ScanOutcome {
        self.manager
            .submit_scan(&Principal::student(student), &ScanRequest::new(session_id, token))
            .await
            .unwrap()
    }
}

/// Next token minted at the mock clock's current instant.
async fn next_token(presenter: &mut Presenter, clock: &MockClock) -> String {
    loop {
        let payload = presenter.tokens.next().await.unwrap();
        if payload.generated_at == clock.now_utc() {
            return payload.token;
        }
    }
}

async fn next_update(presenter: &mut Presenter) -> SessionEvent {
    presenter.events.next().await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn lecture_with_present_late_duplicate_and_absent() {
    let h = harness(&["alice", "bob", "carol"]);
    let session = h
        .manager
        .create_session(
            &h.prof,
            &CreateSessionRequest::new(h.course).with_late_threshold(60),
        )
        .await
        .unwrap();

    let mut viewer = h
        .manager
        .subscribe_viewer(&Principal::student("carol"), session.id)
        .await
        .unwrap();
    let mut presenter = h
        .manager
        .subscribe_presenter(&h.prof, session.id)
        .await
        .unwrap();
    assert!(matches!(
        next_update(&mut presenter).await,
        SessionEvent::InitialStats(_)
    ));

    // t=0
    let token = next_token(&mut presenter, &h.clock).await;
    let outcome = h.scan("alice", session.id, token).await;
    assert!(outcome.accepted);
    assert_eq!(outcome.status, Some(AttendanceStatus::Present));

    // t=90
    h.clock.advance(Duration::seconds(90));
    let token = next_token(&mut presenter, &h.clock).await;
    let outcome = h.scan("bob", session.id, token).await;
    assert!(outcome.accepted);
    assert_eq!(outcome.status, Some(AttendanceStatus::Late));

    // t=120
    h.clock.advance(Duration::seconds(30));
    let token = next_token(&mut presenter, &h.clock).await;
    let outcome = h.scan("alice", session.id, token).await;
    assert_eq!(outcome.result, ScanResult::Duplicate);

    // t=300
    h.clock.advance(Duration::seconds(180));
    let summary = h.manager.close_session(&h.prof, session.id).await.unwrap();
    assert!(!summary.active);

    let carol = h
        .store
        .find_attendance_record(session.id, "carol")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(carol.status, AttendanceStatus::Absent);
    assert!(carol.scanned_at.is_none());

    let stats = h.manager.session_stats(&h.prof, session.id).await.unwrap();
    assert_eq!(stats.present, 1);
    assert_eq!(stats.late, 1);
    assert_eq!(stats.absent, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.percentage, 66.7);

    // Viewer saw every change in order, then the terminal event
    let mut names = Vec::new();
    while let Some(event) = viewer.next().await {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "initial_stats",
            "attendance_updated",
            "attendance_updated",
            "session_closed"
        ]
    );

    assert!(presenter.tokens.next().await.is_none());
    assert!(matches!(
        h.manager.close_session(&h.prof, session.id).await,
        Err(AttendanceError::SessionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn expired_code_is_rejected_and_journaled() {
    let h = harness(&["alice"]);
    let session = h
        .manager
        .create_session(&h.prof, &CreateSessionRequest::new(h.course))
        .await
        .unwrap();
    let mut presenter = h
        .manager
        .subscribe_presenter(&h.prof, session.id)
        .await
        .unwrap();

    let token = next_token(&mut presenter, &h.clock).await;
    h.clock.advance(Duration::seconds(5));
    let outcome = h.scan("alice", session.id, token.clone()).await;
    assert_eq!(outcome.result, ScanResult::Expired);
    assert!(!outcome.accepted);

    for _ in 0..100 {
        if !h.store.audit_entries().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].result, ScanResult::Expired);
    assert_eq!(audit[0].student_id, "alice");
    assert_eq!(audit[0].token, token);
}

#[tokio::test(start_paused = true)]
async fn geofenced_session_checks_distance() {
    let h = harness(&["alice", "bob", "carol"]);
    let center = Coordinates::new(-25.7545, 28.2314);
    let session = h
        .manager
        .create_session(
            &h.prof,
            &CreateSessionRequest::new(h.course).with_geofence(center, Some(30.0)),
        )
        .await
        .unwrap();
    let mut presenter = h
        .manager
        .subscribe_presenter(&h.prof, session.id)
        .await
        .unwrap();
    let token = next_token(&mut presenter, &h.clock).await;

    let request = |student: &str, at: Option<Coordinates>| {
        let mut request = ScanRequest::new(session.id, token.clone());
        request.coordinates = at;
        (Principal::student(student), request)
    };

    let (who, req) = request("alice", None);
    let outcome = h.manager.submit_scan(&who, &req).await.unwrap();
    assert_eq!(outcome.result, ScanResult::LocationRequired);

    let (who, req) = request("alice", Some(Coordinates::new(f64::NAN, f64::NAN)));
    let outcome = h.manager.submit_scan(&who, &req).await.unwrap();
    assert!(!outcome.accepted);
    assert_eq!(outcome.result, ScanResult::LocationInvalid);

    let (who, req) = request("bob", Some(Coordinates::new(-25.7545 + 0.001, 28.2314)));
    let outcome = h.manager.submit_scan(&who, &req).await.unwrap();
    assert_eq!(outcome.result, ScanResult::LocationInvalid);
    assert!(outcome.message.contains("111m away"), "{}", outcome.message);

    let (who, req) = request("carol", Some(center));
    let outcome = h.manager.submit_scan(&who, &req).await.unwrap();
    assert!(outcome.accepted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_by_one_student_record_once() {
    let h = harness(&["alice"]);
    let session = h
        .manager
        .create_session(&h.prof, &CreateSessionRequest::new(h.course))
        .await
        .unwrap();
    let mut presenter = h
        .manager
        .subscribe_presenter(&h.prof, session.id)
        .await
        .unwrap();
    let token = next_token(&mut presenter, &h.clock).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = Arc::clone(&h.manager);
            let request = ScanRequest::new(session.id, token.clone());
            tokio::spawn(async move {
                manager
                    .submit_scan(&Principal::student("alice"), &request)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        if outcome.accepted {
            winners += 1;
        } else {
            assert!(
                matches!(outcome.result, ScanResult::Duplicate | ScanResult::Conflict),
                "unexpected {:?}",
                outcome.result
            );
        }
    }
    assert_eq!(winners, 1);

    let records = h.store.records_for_session(session.id).await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn close_finalizes_ten_students_with_six_marked() {
    let students: Vec<String> = (0..10).map(|i| format!("student-{:02}", i)).collect();
    let refs: Vec<&str> = students.iter().map(String::as_str).collect();
    let h = harness(&refs);

    let session = h
        .manager
        .create_session(&h.prof, &CreateSessionRequest::new(h.course))
        .await
        .unwrap();
    for student in &refs[..6] {
        h.manager
            .mark_present(&h.prof, session.id, student)
            .await
            .unwrap();
    }

    let summary = h.manager.close_session(&h.prof, session.id).await.unwrap();
    assert_eq!(summary.total_students, 10);
    assert_eq!(summary.present, 6);
    assert_eq!(summary.absent, 4);

    let records = h.store.records_for_session(session.id).await.unwrap();
    assert_eq!(records.len(), 10);
    let absent: Vec<_> = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Absent)
        .map(|r| r.student_id.as_str())
        .collect();
    assert_eq!(absent.len(), 4);
    for student in &refs[6..] {
        assert!(absent.contains(student));
    }

    assert!(matches!(
        h.manager.close_session(&h.prof, session.id).await,
        Err(AttendanceError::SessionClosed)
    ));
}

#[tokio::test]
async fn unmark_after_close_still_counts_student_absent() {
    let h = harness(&["alice", "bob"]);
    let session = h
        .manager
        .create_session(&h.prof, &CreateSessionRequest::new(h.course))
        .await
        .unwrap();
    h.manager
        .mark_present(&h.prof, session.id, "alice")
        .await
        .unwrap();
    h.manager.close_session(&h.prof, session.id).await.unwrap();

    // Overrides after close: unmark works, marking needs an active session
    h.manager.unmark(&h.prof, session.id, "bob").await.unwrap();
    assert!(matches!(
        h.manager.mark_present(&h.prof, session.id, "bob").await,
        Err(AttendanceError::SessionClosed)
    ));

    let stats = h.manager.session_stats(&h.prof, session.id).await.unwrap();
    assert_eq!(stats.present, 1);
    assert_eq!(stats.absent, 1);
}

#[tokio::test]
async fn second_active_session_for_course_rejected() {
    let h = harness(&[]);
    let request = CreateSessionRequest::new(h.course);
    h.manager.create_session(&h.prof, &request).await.unwrap();
    assert!(matches!(
        h.manager.create_session(&h.prof, &request).await,
        Err(AttendanceError::ActiveSessionExists)
    ));
}

#[tokio::test(start_paused = true)]
async fn close_survives_store_outage_and_finalizes_later() {
    let h = harness(&["alice", "bob"]);
    let session = h
        .manager
        .create_session(&h.prof, &CreateSessionRequest::new(h.course))
        .await
        .unwrap();
    let mut viewer = h
        .manager
        .subscribe_viewer(&Principal::student("bob"), session.id)
        .await
        .unwrap();
    assert!(matches!(
        viewer.next().await,
        Some(SessionEvent::InitialStats(_))
    ));

    h.store.set_records_failing(true);
    assert!(matches!(
        h.manager.close_session(&h.prof, session.id).await,
        Err(AttendanceError::FinalizationIncomplete(_))
    ));
    assert!(matches!(
        viewer.next().await,
        Some(SessionEvent::SessionClosed(_))
    ));
    assert!(viewer.next().await.is_none());

    h.store.set_records_failing(false);
    let summary = h
        .manager
        .finalize_session(&h.prof, session.id)
        .await
        .unwrap();
    assert_eq!(summary.absent, 2);
    assert!(!summary.active);
}

#[tokio::test]
async fn oversized_late_threshold_rejected() {
    let h = harness(&["alice"]);
    let request = CreateSessionRequest::new(h.course).with_late_threshold(i64::MAX);
    assert!(matches!(
        h.manager.create_session(&h.prof, &request).await,
        Err(AttendanceError::InvalidArgument(_))
    ));
}
