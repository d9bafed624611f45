use proptest::prelude::*;
use wlm_core::{allowed_transitions, validate_transition, JobPhase, MigrationJob};
use wlm_model::{ControllerEndpoint, GroupId};

fn any_phase() -> impl Strategy<Value = JobPhase> {
    prop_oneof![
        Just(JobPhase::Planning),
        Just(JobPhase::Precheck),
        Just(JobPhase::Provisioning),
        Just(JobPhase::CutoverInitiate),
        Just(JobPhase::CutoverVerify),
        Just(JobPhase::Finalize),
        Just(JobPhase::RolledBack),
        Just(JobPhase::Failed),
    ]
}

fn position(phase: JobPhase) -> Option<usize> {
    JobPhase::SUCCESS_PATH.iter().position(|p| *p == phase)
}

#[test]
fn test_failed_reachable_from_every_live_phase() {
    for phase in JobPhase::SUCCESS_PATH {
        assert!(validate_transition(phase, JobPhase::Failed).is_ok(), "{phase:?}");
    }
}

#[test]
fn test_rollback_only_before_cutover() {
    for phase in JobPhase::SUCCESS_PATH {
        let allowed = validate_transition(phase, JobPhase::RolledBack).is_ok();
        assert_eq!(allowed, phase.is_cancellable(), "{phase:?}");
    }
}

proptest! {
    #[test]
    fn prop_validate_agrees_with_allowed(from in any_phase(), to in any_phase()) {
        let allowed = allowed_transitions(from);
        prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
    }

    #[test]
    fn prop_success_path_never_regresses(from in any_phase(), to in any_phase()) {
        if validate_transition(from, to).is_ok() && !to.is_diverted() {
            let (Some(a), Some(b)) = (position(from), position(to)) else {
                panic!("non-diverting transition outside success path: {from:?} -> {to:?}");
            };
            prop_assert_eq!(b, a + 1);
        }
    }

    #[test]
    fn prop_job_history_matches_accepted_moves(moves in prop::collection::vec(any_phase(), 0..12)) {
        let mut job = MigrationJob::new(
            GroupId::new("lobby"),
            1,
            ControllerEndpoint::new("md-1", "10.0.0.1"),
        );
        let mut accepted = vec![JobPhase::Planning];
        for to in moves {
            let before = job.phase;
            if job.advance(to).is_ok() {
                accepted.push(to);
            } else {
                prop_assert_eq!(job.phase, before);
            }
        }
        let history: Vec<JobPhase> = job.history.iter().map(|r| r.phase).collect();
        prop_assert_eq!(history, accepted);
        prop_assert_eq!(job.is_terminal(), job.phase.is_diverted());
    }
}
