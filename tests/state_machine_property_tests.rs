//! Property-based tests for the draft lifecycle
//!
//! Random action sequences are driven through the pure transition function
//! and a version ledger, the same way the gateway commits them. After every
//! step the draft/ledger invariants must hold:
//!
//! 1. version == number of ledger entries, head snapshot mirrors the draft
//! 2. linked invoice iff FINALIZED, rejection reason iff REJECTED
//! 3. a refused action leaves the draft byte-for-byte unchanged
//!
//! The finalize retry property runs through the real gateway.

mod common;

use draft_lifecycle::draft::{Actor, Draft, DraftPatch, DraftStatus, TimeStamp};
use draft_lifecycle::error::{DraftError, ValidationError};
use draft_lifecycle::ledger::{VersionCause, VersionEntry, VersionLedger, record};
use draft_lifecycle::state_machine::{Action, transition};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    EditNotes(String),
    EditTotal(i64),
    Submit,
    Approve { invoice_ok: bool },
    Reject(String),
    Revert(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z ]{1,12}".prop_map(Op::EditNotes),
        (0i64..10_000).prop_map(Op::EditTotal),
        Just(Op::Submit),
        any::<bool>().prop_map(|invoice_ok| Op::Approve { invoice_ok }),
        prop_oneof!["[a-z]{1,10}", Just("   ".to_string())].prop_map(Op::Reject),
        (1u64..8).prop_map(Op::Revert),
    ]
}

fn seeded() -> (Draft, VersionLedger) {
    let actor = Actor::new("user_seed");
    let draft = Draft::open(
        "draft_1prop".into(),
        "DRF-000001".into(),
        common::acme(),
        &actor,
        TimeStamp::new(),
    );
    let mut ledger = VersionLedger::new(draft.id.clone());
    ledger
        .append(VersionEntry::capture(&draft, VersionCause::Created, &actor).unwrap())
        .unwrap();
    (draft, ledger)
}

/// Mirror of the gateway's commit sequence, without storage.
fn step(draft: &mut Draft, ledger: &mut VersionLedger, op: Op) -> Result<(), DraftError> {
    let actor = Actor::new("user_prop");
    let now = TimeStamp::new();
    let action = match op {
        Op::EditNotes(notes) => Action::Edit(DraftPatch::new().set_notes(notes)),
        Op::EditTotal(total) => Action::Edit(DraftPatch::new().set_total_amount(total)),
        Op::Submit => Action::Submit,
        Op::Reject(reason) => Action::Reject { reason },
        Op::Revert(n) => match ledger.get(n) {
            Some(entry) => Action::Revert(entry.clone()),
            None => return Ok(()),
        },
        Op::Approve { invoice_ok } => {
            let approval = transition(draft, Action::Approve, &actor, &now)?;
            let fresh = approval.version_cause().is_some();
            let (next, cause) = if invoice_ok {
                let invoice_id = format!("INV-{}", draft.version);
                let fin = transition(
                    &approval.next,
                    Action::Finalize {
                        invoice_id: invoice_id.clone(),
                    },
                    &actor,
                    &now,
                )?;
                (fin.next, VersionCause::Finalized { invoice_id })
            } else if fresh {
                (approval.next, VersionCause::Approved)
            } else {
                return Ok(());
            };
            let mut next = next;
            ledger.append(record(&mut next, cause, &actor, now)?)?;
            *draft = next;
            return Ok(());
        }
    };

    let outcome = transition(draft, action, &actor, &now)?;
    let cause = outcome
        .version_cause()
        .cloned()
        .expect("non-approve transitions append a version");
    let mut next = outcome.next;
    ledger.append(record(&mut next, cause, &actor, now)?)?;
    *draft = next;
    Ok(())
}

proptest! {
    /// Property: every step keeps the ledger and the draft in agreement
    #[test]
    fn prop_invariants_hold_after_every_step(ops in prop::collection::vec(op_strategy(), 1..=25)) {
        let (mut draft, mut ledger) = seeded();

        for op in ops {
            let before = minicbor::to_vec(&draft).unwrap();
            let len_before = ledger.len();

            match step(&mut draft, &mut ledger, op) {
                Ok(()) => {}
                Err(DraftError::InvalidTransition { .. } | DraftError::Validation(_)) => {
                    prop_assert_eq!(&before, &minicbor::to_vec(&draft).unwrap());
                    prop_assert_eq!(len_before, ledger.len());
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }

            prop_assert!(ledger.consistent_with(&draft));
            prop_assert_eq!(draft.version, ledger.len() as u64);
            prop_assert!(draft.status_fields_consistent());
            for (i, entry) in ledger.list().iter().enumerate() {
                prop_assert_eq!(entry.version_number, i as u64 + 1);
            }
        }
    }

    /// Property: edit succeeds iff the draft is DRAFT or REJECTED
    #[test]
    fn prop_edit_only_in_editable_statuses(
        ops in prop::collection::vec(op_strategy(), 0..=15),
        notes in "[a-z]{1,8}",
    ) {
        let (mut draft, mut ledger) = seeded();
        for op in ops {
            let _ = step(&mut draft, &mut ledger, op);
        }

        let result = transition(
            &draft,
            Action::Edit(DraftPatch::new().set_notes(notes)),
            &Actor::new("user_prop"),
            &TimeStamp::new(),
        );

        if draft.status.is_editable() {
            let t = result.unwrap();
            prop_assert_eq!(t.next.status, DraftStatus::Draft);
            prop_assert_eq!(t.next.rejection_reason, None);
        } else {
            let is_invalid = matches!(result, Err(DraftError::InvalidTransition { .. }));
            prop_assert!(is_invalid);
        }
    }

    /// Property: blank rejection reasons never pass
    #[test]
    fn prop_blank_reason_is_a_validation_error(reason in "[ \t\n]{0,6}") {
        let (mut draft, mut ledger) = seeded();
        step(&mut draft, &mut ledger, Op::Submit).unwrap();

        let before = draft.clone();
        let result = step(&mut draft, &mut ledger, Op::Reject(reason));

        let is_empty_reason = matches!(
            result,
            Err(DraftError::Validation(ValidationError::EmptyReason))
        );
        prop_assert!(is_empty_reason);
        prop_assert_eq!(before, draft);
        prop_assert_eq!(ledger.len(), 2);
    }

    /// Property: after revert(v) the head payload equals version v's payload
    #[test]
    fn prop_revert_restores_payload(
        totals in prop::collection::vec(0i64..10_000, 1..=6),
        pick in any::<prop::sample::Index>(),
    ) {
        let (mut draft, mut ledger) = seeded();
        for total in totals {
            step(&mut draft, &mut ledger, Op::EditTotal(total)).unwrap();
        }
        let target = pick.index(draft.version as usize - 1) as u64 + 1;

        step(&mut draft, &mut ledger, Op::Revert(target)).unwrap();

        let head = draft.version;
        let diff = ledger.diff(head, target).unwrap();
        prop_assert_eq!(diff.payload_changes().count(), 0);
        prop_assert!(diff.status_change().is_none());
        prop_assert_eq!(
            &ledger.head().unwrap().cause,
            &VersionCause::Reverted { from: target }
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: however many times finalize fails first, exactly one invoice is
    /// linked and exactly one FINALIZED entry is appended
    #[test]
    fn prop_finalize_retry_links_one_invoice(failures in 0usize..4) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (gateway, invoices) = common::memory_gateway();
            let draft = gateway.create(common::acme(), &common::clerk()).await.unwrap();
            gateway.submit(&draft.id, &common::clerk()).await.unwrap();

            invoices.fail_next(failures);
            let mut attempts = 0;
            let finalized = loop {
                attempts += 1;
                match gateway.approve(&draft.id, &common::manager()).await {
                    Ok(d) => break d,
                    Err(e) => assert!(e.is_retryable()),
                }
            };

            assert_eq!(attempts, failures + 1);
            assert_eq!(finalized.status, DraftStatus::Finalized);
            assert_eq!(finalized.linked_invoice_id.as_deref(), Some("INV-1"));
            assert_eq!(invoices.issued_count(), 1);

            let versions = gateway.list_versions(&draft.id).await.unwrap();
            let expected = if failures == 0 { 3 } else { 4 };
            assert_eq!(versions.len(), expected);
            assert_eq!(
                versions.iter().filter(|v| v.status == DraftStatus::Finalized).count(),
                1
            );
        });
    }
}
