use chrono::DateTime;
use invoice_dedup_rust::models::{
    GroupEvent, GroupFilter, GroupStatus, InvoiceRecord, JobStatus, RecordId, RiskTier,
};
use invoice_dedup_rust::service::normalizer::normalize;
use invoice_dedup_rust::service::scorer::score_pair;
use invoice_dedup_rust::service::RecordingSink;
use invoice_dedup_rust::{DetectionConfig, DetectionCoordinator};
use std::collections::HashMap;
use std::sync::Arc;

fn invoice(id: RecordId, number: &str, vendor: &str, amount: i64, currency: &str, date: &str) -> InvoiceRecord {
    InvoiceRecord {
        id,
        invoice_number: number.to_string(),
        vendor_name: vendor.to_string(),
        total_amount: amount,
        currency: currency.to_string(),
        issued_at: DateTime::parse_from_rfc3339(&format!("{}T12:00:00+00:00", date)).unwrap(),
        source_document_id: format!("upload-{}", id),
    }
}

fn coordinator(config: DetectionConfig) -> DetectionCoordinator {
    DetectionCoordinator::new(config).unwrap()
}

/// a~b 与 b~c 达到阈值，a 与 c 未达到
fn chain() -> Vec<InvoiceRecord> {
    vec![
        invoice(1, "INV-100", "Acme Corp", 10_000, "USD", "2024-03-01"),
        invoice(2, "INV-100", "Acme Corp", 10_050, "USD", "2024-03-01"),
        invoice(3, "INV-100", "Acme Corp", 10_100, "USD", "2024-03-01"),
    ]
}

/// 当前 pending 分组的 (成员, 风险等级)，按成员排序
fn pending_membership(c: &DetectionCoordinator) -> Vec<(Vec<RecordId>, RiskTier)> {
    let mut groups: Vec<(Vec<RecordId>, RiskTier)> = c
        .all_groups()
        .into_iter()
        .filter(|g| g.status == GroupStatus::Pending)
        .map(|g| (g.members.into_iter().collect(), g.risk_tier))
        .collect();
    groups.sort();
    groups
}

#[test]
fn exact_duplicate_forms_high_risk_group() {
    let c = coordinator(DetectionConfig::default());
    c.submit_record(invoice(1, "INV-2024-001", "Tech Solutions Inc", 500_000, "USD", "2024-01-15"));
    let outcome = c.submit_record(invoice(2, "INV-2024-001", "Tech Solutions Inc", 500_000, "USD", "2024-01-15"));

    let group = c.get_group(outcome.group_id().unwrap()).unwrap();
    assert_eq!(group.members.len(), 2);
    assert!((group.risk_score - 1.0).abs() < 1e-9);
    assert_eq!(group.risk_tier, RiskTier::High);
    assert_eq!(group.matched_fields.len(), 4);
    assert_eq!(group.status, GroupStatus::Pending);
}

#[test]
fn typo_in_invoice_number_groups_as_medium_under_typo_tolerant_weights() {
    let a = invoice(1, "INV-2024-045", "Tech Solutions Inc", 125_000, "USD", "2024-02-01");
    let b = invoice(2, "INV-2024-046", "Tech Solutions Inc", 124_950, "USD", "2024-02-01");

    let strict = coordinator(DetectionConfig::default());
    strict.submit_record(a.clone());
    assert_eq!(strict.submit_record(b.clone()).group_id(), None);

    let tolerant = coordinator(DetectionConfig::typo_tolerant());
    tolerant.submit_record(a);
    let g = tolerant.submit_record(b).group_id().unwrap();
    assert_eq!(tolerant.get_group(g).unwrap().risk_tier, RiskTier::Medium);
}

#[test]
fn currency_mismatch_never_groups() {
    let c = coordinator(DetectionConfig::default());
    c.submit_record(invoice(1, "INV-77", "Globex", 75_000, "USD", "2024-01-15"));
    let outcome = c.submit_record(invoice(2, "INV-77", "Globex", 75_000, "EUR", "2024-01-15"));
    assert!(outcome.is_accepted());
    assert_eq!(outcome.group_id(), None);
    assert!(c.all_groups().is_empty());
}

#[test]
fn grouping_is_transitive_even_when_ends_do_not_match() {
    let config = DetectionConfig::default();
    let records = chain();
    let n: Vec<_> = records.iter().map(|r| normalize(r).unwrap()).collect();
    assert!(score_pair(&n[0], &n[1], &config).score >= config.group_threshold);
    assert!(score_pair(&n[1], &n[2], &config).score >= config.group_threshold);
    assert!(score_pair(&n[0], &n[2], &config).score < config.group_threshold);

    let c = coordinator(config);
    for r in records {
        c.submit_record(r);
    }
    assert_eq!(pending_membership(&c), vec![(vec![1, 2, 3], RiskTier::Medium)]);
}

#[test]
fn membership_does_not_depend_on_arrival_order() {
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let records = chain();
    let expected = vec![(vec![1, 2, 3], RiskTier::Medium)];

    for order in orders {
        let c = coordinator(DetectionConfig::default());
        for idx in order {
            c.submit_record(records[idx].clone());
        }
        assert_eq!(pending_membership(&c), expected, "order {:?}", order);
    }
}

#[test]
fn concurrent_resolution_applies_exactly_once() {
    let c = Arc::new(coordinator(DetectionConfig::default()));
    c.submit_record(invoice(1, "INV-9", "Initech", 42_000, "USD", "2024-04-01"));
    let g = c
        .submit_record(invoice(2, "INV-9", "Initech", 42_000, "USD", "2024-04-01"))
        .group_id()
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let c = Arc::clone(&c);
            std::thread::spawn(move || {
                let reviewer = format!("reviewer-{}", i);
                if i % 2 == 0 {
                    c.merge(g, 1, &reviewer)
                } else {
                    c.ignore(g, &reviewer)
                }
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let final_status = c.get_group(g).unwrap().status;
    assert!(matches!(final_status, GroupStatus::Merged | GroupStatus::Ignored));
    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(o) if !o.is_replay()))
        .count();
    assert_eq!(applied, 1);
    for result in &results {
        match result {
            Ok(outcome) => assert_eq!(outcome.group().status, final_status),
            Err(e) => assert_eq!(e.code(), "conflicting_resolution"),
        }
    }
    assert_eq!(c.audit_log(g).unwrap().len(), 8);
}

#[test]
fn reprocess_twice_is_idempotent() {
    let c = coordinator(DetectionConfig::default());
    for r in chain() {
        c.submit_record(r);
    }
    c.submit_record(invoice(10, "B-1", "Umbrella Ltd", 9_900, "EUR", "2024-05-05"));
    c.submit_record(invoice(11, "B1", "Umbrella Ltd.", 9_900, "EUR", "2024-05-06"));
    c.submit_record(invoice(12, "", "", 100, "EUR", "2024-05-06"));
    let before = pending_membership(&c);
    assert_eq!(before.len(), 2);

    let first = c.reprocess_blocking(None);
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(first.processed, 6);
    let after_first = pending_membership(&c);
    c.reprocess_blocking(None);
    let after_second = pending_membership(&c);

    assert_eq!(before, after_first);
    assert_eq!(after_first, after_second);
}

#[test]
fn reprocess_applies_reloaded_weights() {
    let c = coordinator(DetectionConfig::default());
    c.submit_record(invoice(1, "INV-2024-045", "Tech Solutions Inc", 125_000, "USD", "2024-02-01"));
    c.submit_record(invoice(2, "INV-2024-046", "Tech Solutions Inc", 124_950, "USD", "2024-02-01"));
    assert!(pending_membership(&c).is_empty());

    c.reload_config(DetectionConfig::typo_tolerant()).unwrap();
    let job = c.reprocess_blocking(None);
    assert_eq!(job.checkpoint, Some(2));
    assert_eq!(pending_membership(&c), vec![(vec![1, 2], RiskTier::Medium)]);
}

#[test]
fn retracting_the_bridge_record_dissolves_the_group() {
    let sink = Arc::new(RecordingSink::new());
    let c = coordinator(DetectionConfig::default()).with_sink(sink.clone());
    for r in chain() {
        c.submit_record(r);
    }
    let g = pending_membership(&c);
    assert_eq!(g.len(), 1);

    c.retract_record(2).unwrap();
    assert!(pending_membership(&c).is_empty());
    assert!(matches!(
        sink.events().last(),
        Some(GroupEvent::GroupDissolved { absorbed_into: None, .. })
    ));
    assert!(c.retract_record(2).is_err());
}

#[test]
fn new_match_against_merged_group_opens_linked_group() {
    let c = coordinator(DetectionConfig::default());
    c.submit_record(invoice(1, "INV-5", "Hooli", 20_000, "USD", "2024-06-01"));
    let frozen = c
        .submit_record(invoice(2, "INV-5", "Hooli", 20_000, "USD", "2024-06-01"))
        .group_id()
        .unwrap();
    c.merge(frozen, 1, "alice").unwrap();
    assert_eq!(c.superseded_by(2), Some(1));

    let fresh = c
        .submit_record(invoice(3, "INV-5", "Hooli", 20_000, "USD", "2024-06-02"))
        .group_id()
        .unwrap();
    assert_ne!(fresh, frozen);

    let group = c.get_group(fresh).unwrap();
    assert_eq!(group.members.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    assert!(group.linked_groups.contains(&frozen));
    let merged = c.get_group(frozen).unwrap();
    assert_eq!(merged.status, GroupStatus::Merged);
    assert_eq!(merged.members.len(), 2);
}

#[test]
fn event_versions_increase_per_group() {
    let sink = Arc::new(RecordingSink::new());
    let c = coordinator(DetectionConfig::default()).with_sink(sink.clone());
    for r in chain() {
        c.submit_record(r);
    }
    let g = c
        .groups_iter(GroupFilter::default(), None, 10)
        .next()
        .unwrap()
        .id;
    c.ignore(g, "bob").unwrap();
    c.ignore(g, "bob").unwrap();

    let mut last: HashMap<i64, u64> = HashMap::new();
    for event in sink.events() {
        let previous = last.insert(event.group_id(), event.version());
        assert!(previous.map_or(true, |v| v < event.version()));
    }
    assert!(matches!(
        sink.events().last(),
        Some(GroupEvent::GroupResolved { status: GroupStatus::Ignored, survivor: None, .. })
    ));
}

#[tokio::test]
async fn batch_submission_matches_sequential_result() {
    let c = Arc::new(coordinator(DetectionConfig::default()));
    let mut records = chain();
    records.push(invoice(4, "", "", 1, "USD", "2024-03-01"));
    records.push(invoice(5, "X-1", "Acme Corp", 1, "usd!", "2024-03-01"));

    let outcomes = c.submit_batch(records, 4).await;
    let ids: Vec<RecordId> = outcomes.iter().map(|o| o.record_id()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(outcomes[3].is_accepted());
    assert!(!outcomes[4].is_accepted());
    assert_eq!(pending_membership(&c), vec![(vec![1, 2, 3], RiskTier::Medium)]);
}

#[test]
fn retracted_id_stays_retracted() {
    let c = coordinator(DetectionConfig::default());
    c.submit_record(invoice(1, "INV-31", "Wayne Enterprises", 88_000, "USD", "2024-07-01"));
    c.submit_record(invoice(2, "INV-31", "Wayne Enterprises", 88_000, "USD", "2024-07-01"));
    c.retract_record(2).unwrap();

    let again = c.submit_record(invoice(2, "INV-31", "Wayne Enterprises", 88_000, "USD", "2024-07-01"));
    assert!(!again.is_accepted());
    assert_eq!(again.record_id(), 2);
    assert_eq!(c.retract_record(2).unwrap_err().code(), "record_not_found");

    // 新 id 的完全重复仍会与存活记录成组
    let copy = c.submit_record(invoice(3, "INV-31", "Wayne Enterprises", 88_000, "USD", "2024-07-01"));
    assert_eq!(pending_membership(&c), vec![(vec![1, 3], RiskTier::High)]);
    assert!(copy.group_id().is_some());
}

#[test]
fn superseded_records_rematch_after_survivor_is_retracted() {
    let c = coordinator(DetectionConfig::default());
    c.submit_record(invoice(1, "INV-8", "Stark Industries", 31_000, "USD", "2024-08-01"));
    let frozen = c
        .submit_record(invoice(2, "INV-8", "Stark Industries", 31_000, "USD", "2024-08-01"))
        .group_id()
        .unwrap();
    c.merge(frozen, 1, "carol").unwrap();
    c.submit_record(invoice(3, "INV-8", "Stark Industries", 31_000, "USD", "2024-08-02"));
    assert_eq!(pending_membership(&c), vec![(vec![1, 3], RiskTier::High)]);

    c.retract_record(1).unwrap();
    assert_eq!(c.superseded_by(2), None);
    assert_eq!(pending_membership(&c), vec![(vec![2, 3], RiskTier::High)]);

    let g = c
        .submit_record(invoice(4, "INV-8", "Stark Industries", 31_000, "USD", "2024-08-02"))
        .group_id()
        .unwrap();
    let group = c.get_group(g).unwrap();
    assert_eq!(group.members.into_iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    assert!(group.linked_groups.contains(&frozen));
}
