use crate::subscription::{SubscriptionController, SubscriptionState};

#[test]
fn first_select_subscribes_without_unsubscribe() {
    // Arrange
    let mut controller = SubscriptionController::new();

    // Act
    let switch = controller.select("d1").expect("transition");

    // Assert
    assert_eq!(switch.unsubscribe, None);
    assert_eq!(switch.subscribe, "d1");
    assert_eq!(controller.state(), &SubscriptionState::Subscribed("d1".to_string()));
}

#[test]
fn switching_unsubscribes_the_previous_device() {
    // Arrange
    let mut controller = SubscriptionController::new();
    controller.select("d1").expect("transition");

    // Act
    let switch = controller.select("d2").expect("transition");

    // Assert
    assert_eq!(switch.unsubscribe.as_deref(), Some("d1"));
    assert_eq!(controller.active(), Some("d2"));
}

#[test]
fn reselecting_the_active_device_is_a_no_op() {
    // Arrange
    let mut controller = SubscriptionController::new();
    let first = controller.select("d1").expect("transition");

    // Act
    let again = controller.select("d1");

    // Assert
    assert!(again.is_none());
    assert!(controller.accepts(&first.tag), "tag stays current after a redundant select");
}

#[test]
fn tags_from_an_earlier_selection_are_rejected() {
    // Arrange
    let mut controller = SubscriptionController::new();
    let a = controller.select("a").expect("transition").tag;
    controller.select("b").expect("transition");
    let a_again = controller.select("a").expect("transition").tag;

    // Act / Assert
    assert!(!controller.accepts(&a), "A -> B -> A must not revive the first request");
    assert!(controller.accepts(&a_again));
}

#[test]
fn renew_invalidates_outstanding_tags() {
    // Arrange
    let mut controller = SubscriptionController::new();
    assert!(controller.renew().is_none(), "idle controller has nothing to renew");
    let old = controller.select("d1").expect("transition").tag;

    // Act
    let fresh = controller.renew().expect("active device");

    // Assert
    assert!(!controller.accepts(&old));
    assert!(controller.accepts(&fresh));
    assert_eq!(controller.current_tag(), Some(fresh));
}
