//! Priority classification, status machine, and label parsing.

use laneq::error::Error;
use laneq::model::*;
use rstest::rstest;

#[rstest]
#[case(0, Bucket::Low)]
#[case(3, Bucket::Low)]
#[case(4, Bucket::Normal)]
#[case(5, Bucket::Normal)]
#[case(7, Bucket::Normal)]
#[case(8, Bucket::High)]
#[case(9, Bucket::High)]
#[case(10, Bucket::High)]
fn classify_maps_priority_to_bucket(#[case] value: i32, #[case] expected: Bucket) {
    let priority = Priority::new(value).unwrap();
    assert_eq!(classify(priority), expected);
    assert_eq!(priority.bucket(), expected);
}

#[rstest]
#[case(-1)]
#[case(11)]
#[case(i32::MAX)]
fn priority_out_of_range_is_rejected(#[case] value: i32) {
    assert!(matches!(Priority::new(value), Err(Error::InvalidPriority(v)) if v == value));
}

#[test]
fn priority_defaults_to_five() {
    assert_eq!(Priority::default().value(), 5);
    assert_eq!(Priority::default().bucket(), Bucket::Normal);
}

#[test]
fn priority_deserialization_validates_range() {
    let ok: Priority = serde_json::from_str("9").unwrap();
    assert_eq!(ok.value(), 9);
    assert!(serde_json::from_str::<Priority>("12").is_err());
}

#[test]
fn buckets_poll_high_first() {
    assert_eq!(
        Bucket::DESCENDING,
        [Bucket::High, Bucket::Normal, Bucket::Low]
    );
    assert!(Bucket::High > Bucket::Normal && Bucket::Normal > Bucket::Low);
}

#[rstest]
#[case(Status::Queued, Status::Upgraded, true)]
#[case(Status::Upgraded, Status::Queued, true)]
#[case(Status::Queued, Status::Running, true)]
#[case(Status::Queued, Status::Cancelled, true)]
#[case(Status::Running, Status::Completed, true)]
#[case(Status::Running, Status::Failed, true)]
#[case(Status::Running, Status::Upgraded, false)]
#[case(Status::Upgraded, Status::Running, false)]
#[case(Status::Completed, Status::Queued, false)]
#[case(Status::Cancelled, Status::Queued, false)]
#[case(Status::Failed, Status::Running, false)]
fn status_transitions(#[case] from: Status, #[case] to: Status, #[case] allowed: bool) {
    assert_eq!(from.can_transition_to(to), allowed);
    assert_eq!(validate_transition(from, to).is_ok(), allowed);
}

#[test]
fn terminal_statuses() {
    assert!(Status::Completed.is_terminal());
    assert!(Status::Failed.is_terminal());
    assert!(Status::Cancelled.is_terminal());
    assert!(!Status::Queued.is_terminal());
    assert!(!Status::Upgraded.is_terminal());
    assert!(!Status::Running.is_terminal());
}

#[test]
fn labels_parse_and_render() {
    assert_eq!("etl".parse::<Category>().unwrap(), Category::Etl);
    assert_eq!("transform".parse::<Phase>().unwrap(), Phase::Transform);
    assert_eq!("upgraded".parse::<Status>().unwrap(), Status::Upgraded);
    assert_eq!(Category::Webapp.to_string(), "webapp");
    assert_eq!(Phase::default(), Phase::Default);
    assert!(matches!(
        "nightly".parse::<Category>(),
        Err(Error::InvalidLabel { kind: "category", .. })
    ));
}

#[rstest]
#[case(UpgradeAction::Prioritize, 8)]
#[case(UpgradeAction::Urgent, 9)]
#[case(UpgradeAction::Critical, 10)]
fn named_actions_have_fixed_targets(#[case] action: UpgradeAction, #[case] expected: u8) {
    let (resolved, priority) = UpgradeTarget::Action(action).resolve().unwrap();
    assert_eq!(resolved, action);
    assert_eq!(priority.value(), expected);
}

#[test]
fn explicit_target_resolves_to_custom() {
    let (action, priority) = UpgradeTarget::Priority(6).resolve().unwrap();
    assert_eq!(action, UpgradeAction::Custom);
    assert_eq!(priority.value(), 6);

    assert!(matches!(
        UpgradeTarget::Priority(42).resolve(),
        Err(Error::InvalidPriority(42))
    ));
    assert!(UpgradeTarget::Action(UpgradeAction::Custom).resolve().is_err());
}

#[test]
fn task_id_short_is_prefix_of_full() {
    let id = TaskId::new();
    assert!(id.to_string().starts_with(&id.short()));
    assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
}
