//! Integration tests for the verification engine
//!
//! Drives the engine end to end against the scripted authority and an
//! in-memory cache: remote answers, offline fallback, confirmation and the
//! busy-scanner policy.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use gatecheck_core::{
    DEFAULT_SLOT, InMemorySlotStorage, Ticket, TicketCache, TicketKey, TicketStatus,
    VerificationOutcome, VerificationSource,
};
use gatecheck_scanner::{ConfirmOutcome, Presentation, ScanPhase, VerificationEngine};
use gatecheck_testing::{AuthorityMode, ManualClock, ScriptedAuthority, fixtures, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const QR_UUID: &str = "abcd1234-5e6f-4a7b-8c9d-0e1f2a3b4c5d";

fn engine_with(authority: Arc<ScriptedAuthority>, cached: &[Ticket]) -> VerificationEngine {
    VerificationEngine::new(
        authority,
        Arc::new(fixtures::cache_with(cached)),
        Arc::new(test_clock()),
    )
}

fn offline_engine(cached: &[Ticket]) -> VerificationEngine {
    engine_with(Arc::new(ScriptedAuthority::offline()), cached)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_a_remote_valid_offers_confirm() {
    gatecheck_testing::init_test_tracing();
    let authority = Arc::new(ScriptedAuthority::new().with_ticket(fixtures::valid("T-001")));
    let engine = engine_with(authority, &[]);

    let report = engine.verify("T-001").await;

    assert_eq!(report.outcome.source(), Some(VerificationSource::Remote));
    assert!(report.result().valid);
    assert_eq!(report.result().ticket_status(), Some(TicketStatus::Valid));
    assert!(report.confirmation().is_some());
    assert!(matches!(
        report.presentation(),
        Presentation::Valid { can_confirm: true, ref scanned, .. } if scanned == "T-001"
    ));
}

#[tokio::test]
async fn test_scenario_b_offline_used_ticket_shows_prior_use() {
    let used_at = fixtures::at(2024, 7, 1, 10, 0);
    let engine = offline_engine(&[fixtures::used("T-002", used_at)]);

    let report = engine.verify("T-002").await;

    assert!(matches!(report.outcome, VerificationOutcome::Fallback(_)));
    assert!(!report.result().valid);
    assert_eq!(report.result().used_at, Some(used_at));
    assert!(report.confirmation().is_none());
    assert_eq!(
        report.presentation(),
        Presentation::AlreadyUsed {
            scanned: "T-002".to_string(),
            message: "This ticket has already been used.".to_string(),
            used_at: Some(used_at),
            offline: true,
        }
    );
}

#[tokio::test]
async fn test_scenario_c_offline_unknown_ticket_is_not_found() {
    let engine = offline_engine(&[fixtures::valid("T-999")]);

    let report = engine.verify("T-002").await;

    assert_eq!(report.outcome, VerificationOutcome::ExhaustedNotFound);
    let result = report.result();
    assert!(!result.valid);
    assert!(result.message.contains("not found"));
    assert_eq!(result.used_at, None);
    assert!(matches!(report.presentation(), Presentation::NotFound { .. }));
    assert_eq!(engine.phase(), ScanPhase::Invalid);
}

#[tokio::test]
async fn test_scenario_d_remote_confirm_then_verify_reports_used() {
    let authority = Arc::new(ScriptedAuthority::new().with_ticket(fixtures::valid("T-001")));
    let engine = engine_with(authority.clone(), &[]);

    let confirmation = engine.verify("T-001").await.confirmation().unwrap();
    let confirmed = engine.confirm_used(confirmation).await;
    assert!(matches!(confirmed.outcome, ConfirmOutcome::Remote { .. }));

    let report = engine.verify("T-001").await;
    assert_eq!(report.outcome.source(), Some(VerificationSource::Remote));
    assert_eq!(report.result().ticket_status(), Some(TicketStatus::Used));
    assert_eq!(report.result().used_at, Some(test_clock_time()));
    assert!(authority.ticket("T-001").unwrap().is_used());
}

fn test_clock_time() -> gatecheck_core::DateTime<gatecheck_core::Utc> {
    use gatecheck_core::Clock;
    test_clock().now()
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_unknown_everywhere_is_not_found_without_used_at() {
    let cached = [fixtures::valid("T-100"), fixtures::numbered(7, QR_UUID)];

    for mode in [
        AuthorityMode::Online,
        AuthorityMode::Offline,
        AuthorityMode::ServerError(503),
        AuthorityMode::Malformed,
    ] {
        let authority = Arc::new(ScriptedAuthority::new());
        authority.set_mode(mode.clone());
        let engine = engine_with(authority, &cached);

        for identifier in ["T-404", "ffffffff-0000-4000-8000-000000000000", "nothing"] {
            let result = engine.verify(identifier).await.result();
            assert!(!result.valid, "{mode:?} {identifier}");
            assert!(result.message.contains("not found"), "{mode:?} {identifier}");
            assert_eq!(result.used_at, None, "{mode:?} {identifier}");
        }
    }
}

#[tokio::test]
async fn test_cached_used_tickets_keep_their_timestamp() {
    let tickets = [
        fixtures::used("T-010", fixtures::at(2024, 6, 30, 18, 45)),
        fixtures::used("T-011", fixtures::at(2024, 7, 1, 9, 5)),
        fixtures::numbered(12, QR_UUID).used(fixtures::at(2024, 7, 1, 9, 59)),
    ];
    let engine = offline_engine(&tickets);

    for ticket in &tickets {
        let result = engine.verify(ticket.qr_payload()).await.result();
        assert!(!result.valid);
        assert_eq!(result.used_at, ticket.used_at);
    }
}

#[tokio::test]
async fn test_confirm_twice_reports_used_both_times_online() {
    let authority = Arc::new(ScriptedAuthority::new().with_ticket(fixtures::valid("T-001")));
    let engine = engine_with(authority, &[]);
    let confirmation = engine.verify("T-001").await.confirmation().unwrap();

    let first = engine.confirm_used(confirmation.clone()).await;
    let second = engine.confirm_used(confirmation).await;

    assert!(matches!(first.outcome, ConfirmOutcome::Remote { .. }));
    assert!(matches!(second.outcome, ConfirmOutcome::Rejected { .. }));
    assert_eq!(first.outcome.ticket_status(), Some(TicketStatus::Used));
    assert_eq!(second.outcome.ticket_status(), Some(TicketStatus::Used));
    assert!(matches!(second.presentation(), Presentation::AlreadyUsed { .. }));
}

#[tokio::test]
async fn test_confirm_twice_reports_used_both_times_offline() {
    let engine = offline_engine(&[fixtures::valid("T-001")]);
    let confirmation = engine.verify("T-001").await.confirmation().unwrap();

    let first = engine.confirm_used(confirmation.clone()).await;
    let second = engine.confirm_used(confirmation).await;

    for report in [&first, &second] {
        assert!(matches!(report.outcome, ConfirmOutcome::Fallback(_)));
        assert_eq!(report.outcome.ticket_status(), Some(TicketStatus::Used));
    }
    // The second mutation does not move the timestamp
    assert_eq!(first.outcome.result().used_at, second.outcome.result().used_at);
}

#[tokio::test]
async fn test_fallback_finds_uuid_ticket_by_every_scanned_form() {
    let engine = offline_engine(&[fixtures::numbered(42, QR_UUID)]);

    for scanned in [QR_UUID, "42", "TICKET-42-GATE-B", "abcd1234"] {
        let report = engine.verify(scanned).await;
        assert!(
            matches!(report.outcome, VerificationOutcome::Fallback(ref r) if r.valid),
            "{scanned}: {:?}",
            report.outcome
        );
    }
}

#[tokio::test]
async fn test_remote_confirm_is_mirrored_for_later_offline_scans() {
    let authority = Arc::new(ScriptedAuthority::new().with_ticket(fixtures::valid("T-001")));
    let engine = engine_with(authority.clone(), &[fixtures::valid("T-001")]);

    let confirmation = engine.verify("T-001").await.confirmation().unwrap();
    engine.confirm_used(confirmation).await;

    authority.set_mode(AuthorityMode::Offline);
    let report = engine.verify("T-001").await;

    assert!(matches!(report.outcome, VerificationOutcome::Fallback(_)));
    assert_eq!(report.result().used_at, Some(test_clock_time()));
}

#[tokio::test]
async fn test_mutation_failure_alone_falls_back_to_cache() {
    let authority = Arc::new(ScriptedAuthority::new().with_ticket(fixtures::valid("T-001")));
    authority.set_mutation_mode(AuthorityMode::ServerError(502));
    let engine = engine_with(authority.clone(), &[fixtures::valid("T-001")]);

    let confirmation = engine.verify("T-001").await.confirmation().unwrap();
    let report = engine.confirm_used(confirmation).await;

    assert!(matches!(report.outcome, ConfirmOutcome::Fallback(_)));
    assert_eq!(report.message(), "Ticket marked as used (offline).");
    // Known gap: the authority never hears about the offline use
    assert!(!authority.ticket("T-001").unwrap().is_used());
}

#[tokio::test]
async fn test_confirm_for_ticket_unknown_to_cache_reports_not_found() {
    let authority = Arc::new(ScriptedAuthority::new().with_ticket(fixtures::valid("T-001")));
    let engine = engine_with(authority.clone(), &[]);

    let confirmation = engine.verify("T-001").await.confirmation().unwrap();
    authority.set_mode(AuthorityMode::Offline);
    let report = engine.confirm_used(confirmation).await;

    assert_eq!(report.outcome, ConfirmOutcome::NotFound);
    assert!(!report.outcome.result().valid);
    assert!(matches!(report.presentation(), Presentation::NotFound { .. }));
}

#[tokio::test]
async fn test_remote_confirm_leaves_loosely_matching_tickets_alone() {
    let authority = Arc::new(ScriptedAuthority::new().with_ticket(fixtures::valid("T-100")));
    let engine = engine_with(authority.clone(), &[Ticket::new(1_i64), fixtures::valid("T-100")]);

    let confirmation = engine.verify("T-100").await.confirmation().unwrap();
    assert!(matches!(
        engine.confirm_used(confirmation).await.outcome,
        ConfirmOutcome::Remote { .. }
    ));

    authority.set_mode(AuthorityMode::Offline);

    let report = engine.verify("1").await;
    assert!(matches!(report.outcome, VerificationOutcome::Fallback(ref r) if r.valid));
    assert_eq!(
        report.result().ticket.as_ref().map(|t| t.id.clone()),
        Some(TicketKey::Number(1))
    );

    let report = engine.verify("T-100").await;
    assert_eq!(report.result().ticket_status(), Some(TicketStatus::Used));
}

#[tokio::test]
async fn test_unreadable_cache_entry_does_not_block_offline_scans() {
    let slot = json!([
        {"id": "T-001", "status": "VALID", "category": "GOLD"},
        {"id": "T-002", "status": "USED", "used_at": "2024-07-01 10:00"}
    ]);
    let cache = TicketCache::with_default_slot(Arc::new(InMemorySlotStorage::with_slot(
        DEFAULT_SLOT,
        slot.to_string(),
    )));
    let engine = VerificationEngine::new(
        Arc::new(ScriptedAuthority::offline()),
        Arc::new(cache),
        Arc::new(test_clock()),
    );

    let report = engine.verify("T-001").await;
    assert!(matches!(report.outcome, VerificationOutcome::Fallback(ref r) if r.valid));

    let confirmed = engine.confirm_used(report.confirmation().unwrap()).await;
    assert!(matches!(confirmed.outcome, ConfirmOutcome::Fallback(_)));
    assert_eq!(engine.cache().load_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_later_offline_confirm_keeps_first_use_time() {
    let first_use = fixtures::at(2024, 7, 1, 10, 0);
    let clock = Arc::new(ManualClock::new(first_use));
    let engine = VerificationEngine::new(
        Arc::new(ScriptedAuthority::offline()),
        Arc::new(fixtures::cache_with(&[fixtures::valid("T-001")])),
        clock.clone(),
    );
    let confirmation = engine.verify("T-001").await.confirmation().unwrap();

    let first = engine.confirm_used(confirmation.clone()).await;
    clock.advance(chrono::Duration::hours(1));
    let second = engine.confirm_used(confirmation).await;

    assert_eq!(first.outcome.result().used_at, Some(first_use));
    assert_eq!(second.outcome.result().used_at, Some(first_use));
    assert_eq!(engine.verify("T-001").await.result().used_at, Some(first_use));
}

#[tokio::test]
async fn test_later_remote_confirm_keeps_first_use_time() {
    let first_use = fixtures::at(2024, 7, 1, 10, 0);
    let clock = Arc::new(ManualClock::new(first_use));
    let authority = Arc::new(
        ScriptedAuthority::new()
            .with_ticket(fixtures::valid("T-001"))
            .with_clock(clock.clone()),
    );
    let engine = VerificationEngine::new(
        authority.clone(),
        Arc::new(fixtures::cache_with(&[fixtures::valid("T-001")])),
        clock.clone(),
    );
    let confirmation = engine.verify("T-001").await.confirmation().unwrap();

    let first = engine.confirm_used(confirmation.clone()).await;
    clock.advance(chrono::Duration::hours(1));
    let second = engine.confirm_used(confirmation).await;

    assert!(matches!(first.outcome, ConfirmOutcome::Remote { .. }));
    assert!(matches!(second.outcome, ConfirmOutcome::Rejected { .. }));
    assert_eq!(second.outcome.result().used_at, Some(first_use));
    assert_eq!(authority.ticket("T-001").unwrap().used_at, Some(first_use));

    // The mirrored cache entry carries the authority's timestamp too
    authority.set_mode(AuthorityMode::Offline);
    assert_eq!(engine.verify("T-001").await.result().used_at, Some(first_use));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scans_arriving_mid_lookup_are_ignored_by_try_verify() {
    let authority = Arc::new(
        ScriptedAuthority::new()
            .with_ticket(fixtures::valid("T-001"))
            .with_latency(Duration::from_secs(5)),
    );
    let engine = Arc::new(engine_with(authority.clone(), &[]));
    let mut phases = engine.subscribe();

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.verify("T-001").await }
    });
    phases.wait_for(|phase| *phase == ScanPhase::LookingUp).await.unwrap();
    assert!(engine.phase().is_busy());

    assert!(engine.try_verify("T-001").await.is_none());

    let report = first.await.unwrap();
    assert!(report.result().valid);
    assert_eq!(authority.calls().len(), 1);

    // Idle again: the next scan goes through
    assert!(engine.try_verify("T-001").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_verify_queues_behind_an_in_flight_scan() {
    let authority = Arc::new(
        ScriptedAuthority::new()
            .with_ticket(fixtures::valid("T-001"))
            .with_ticket(fixtures::valid("T-002"))
            .with_latency(Duration::from_secs(1)),
    );
    let engine = Arc::new(engine_with(authority.clone(), &[]));

    let (a, b) = tokio::join!(engine.verify("T-001"), engine.verify("T-002"));

    assert!(a.result().valid);
    assert!(b.result().valid);
    assert_eq!(authority.calls().len(), 2);
}
