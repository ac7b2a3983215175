// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Status Classification
//!
//! Every status belongs to exactly one reporting class, and the stack phase
//! machine settles on the first terminal status of the stack itself.

use cim_deploy::event_source::EventSourceKind;
use cim_deploy::stack::{StackOperation, StackStatus, StatusClass};
use cim_deploy::state_machine::{StackInput, StackPhase, StateMachine, StateMachineWithHistory};
use cim_deploy::EventSourceConfig;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn known_status() -> impl Strategy<Value = StackStatus> {
    prop::sample::select(StackStatus::KNOWN.to_vec())
}

fn operation() -> impl Strategy<Value = StackOperation> {
    prop_oneof![
        Just(StackOperation::Create),
        Just(StackOperation::Update),
        Just(StackOperation::Delete),
    ]
}

/// Replay `statuses` the way the poller does: stop at the first terminal phase
fn replay(operation: StackOperation, statuses: &[StackStatus]) -> StateMachineWithHistory<StackPhase> {
    let mut fsm = StateMachineWithHistory::new(StackPhase::None);
    fsm.apply(StackInput::Submit(operation)).unwrap();
    for status in statuses {
        if fsm.current().is_terminal() {
            break;
        }
        fsm.apply(StackInput::Observe(status.clone())).unwrap();
    }
    fsm
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: classification is total and terminality follows the class
    #[test]
    fn prop_every_status_has_one_class(status in known_status()) {
        let class = status.classify();
        prop_assert_eq!(
            status.is_terminal(),
            matches!(class, StatusClass::Success | StatusClass::Failure)
        );
        prop_assert_eq!(status.is_success(), class == StatusClass::Success);
    }

    /// Property: unknown status strings survive parsing and are informational
    #[test]
    fn prop_unknown_status_is_kept_verbatim(raw in "[A-Z]{3,12}_[A-Z]{3,12}_X") {
        let status = StackStatus::parse(&raw);
        prop_assert_eq!(status.as_str(), raw.as_str());
        prop_assert_eq!(status.classify(), StatusClass::Info);
    }

    /// Property: the exit code is 0 exactly when the first terminal status is a success
    #[test]
    fn prop_exit_code_follows_first_terminal_status(
        op in operation(),
        statuses in prop::collection::vec(known_status(), 0..20),
    ) {
        let fsm = replay(op, &statuses);
        let first_terminal = statuses.iter().find(|s| s.is_terminal());

        match first_terminal {
            Some(status) if status.is_success() => prop_assert_eq!(fsm.current().exit_code(), 0),
            _ => prop_assert_eq!(fsm.current().exit_code(), 1),
        }
        let path = fsm.path();
        prop_assert_eq!(path.first(), Some(&StackPhase::None));
    }

    /// Property: a schedule or pattern always selects the rule adapter, whatever else is declared
    #[test]
    fn prop_rule_fields_win_classification(
        schedule in "rate\\([1-9][0-9]? minutes\\)",
        service in prop::sample::select(vec!["s3", "sns", "kinesis", "dynamodb", "cloudfront"]),
    ) {
        let config = EventSourceConfig {
            schedule: Some(schedule),
            arn: Some(format!("arn:aws:{service}:eu-west-1:123456789012:thing")),
            ..EventSourceConfig::default()
        };
        prop_assert_eq!(EventSourceKind::classify(&config).unwrap(), EventSourceKind::Rule);
    }

    /// Property: an ARN alone selects the adapter by its service
    #[test]
    fn prop_arn_service_selects_kind(
        (service, expected) in prop::sample::select(vec![
            ("s3", EventSourceKind::Object),
            ("sns", EventSourceKind::Topic),
            ("kinesis", EventSourceKind::Stream),
            ("dynamodb", EventSourceKind::Stream),
            ("cloudfront", EventSourceKind::Edge),
        ]),
        resource in "[a-z][a-z0-9-]{0,20}",
    ) {
        let config = EventSourceConfig {
            arn: Some(format!("arn:aws:{service}:eu-west-1:123456789012:{resource}")),
            ..EventSourceConfig::default()
        };
        prop_assert_eq!(EventSourceKind::classify(&config).unwrap(), expected);
    }
}
