//! End-to-end tests for the engine against the in-memory mount.

use std::sync::Arc;
use std::time::Duration;

use motionmount_controller::{
    ActionClass, AuthPolicy, AuthType, AutoMove, Feature, HdmiChannel, MAX_AUTH_ATTEMPTS,
    MockLink, MockOp, MotionMount, MountError, MountEvent, MultiPinFeatures, PinSetting, PinTier,
    PresetData, PresetTarget, RetryPolicy,
};
use motionmount_proto::ble::{
    AUTH_STATUS_UUID, AUTHENTICATE_UUID, AUTOMOVE_UUID, CALIBRATE_UUID, DISTANCE_UUID,
    FREEZE_UUID, MULTI_PIN_FEATURES_UUID, NAME_UUID, PRESET_NAME_UUIDS, PRESET_UUIDS,
    ROTATION_UUID, SELECT_PRESET_UUID, WIDTH_UUID,
};
use motionmount_proto::{
    encode_distance, encode_multi_pin_features, encode_preset, encode_rotation,
};

fn fast_policy() -> AuthPolicy {
    AuthPolicy {
        attempts: 4,
        interval: Duration::from_millis(1),
    }
}

fn mount(link: &MockLink, pin: Option<&str>) -> MotionMount<MockLink> {
    MotionMount::with_policy(link.clone(), pin, fast_policy()).unwrap()
}

fn cinema() -> PresetData {
    PresetData {
        name: "Cinema".to_string(),
        distance: 80,
        rotation: -20,
    }
}

fn store_preset(link: &MockLink, slot: usize, data: &PresetData) {
    let (head, tail) = encode_preset(Some(data)).unwrap();
    link.set_value(PRESET_UUIDS[slot], &head);
    link.set_value(PRESET_NAME_UUIDS[slot], &tail);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn supervisor_pin_grants_full_on_first_poll() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("2222"));

    assert!(mount.has_permission(ActionClass::Settings, None).await.unwrap());
    assert_eq!(mount.permissions().auth_type, AuthType::Full);
    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 1);
}

#[tokio::test]
async fn authorized_user_pin_falls_back_to_control() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("1111"));

    assert!(mount.has_permission(ActionClass::Control, None).await.unwrap());
    assert_eq!(mount.permissions().auth_type, AuthType::Control);
    // Supervisor tier is tried first and exhausts its polls
    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 5);
}

#[tokio::test]
async fn remembered_tier_is_tried_first_after_reconnect() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("1111"));
    mount.set_distance(10).await.unwrap();

    link.simulate_disconnect();
    link.clear_ops();
    mount.set_distance(20).await.unwrap();

    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 1);
}

#[tokio::test]
async fn wrong_pin_reports_cooldown_after_bounded_polls() {
    let link = MockLink::new()
        .with_pins(Some(1111), Some(2222))
        .with_lockout_code(5);
    let mount = mount(&link, Some("9999"));

    let err = mount.set_distance(10).await.unwrap_err();
    assert!(matches!(err, MountError::Authentication { cooldown: 5 }), "{err}");
    // At most four checks per tier
    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 8);
    assert!(link.writes_to(DISTANCE_UUID).is_empty());

    let permissions = mount.permissions();
    assert_eq!(permissions.auth_type, AuthType::Wrong);
    assert_eq!(permissions.cooldown_seconds, 5);
}

#[tokio::test]
async fn oversized_poll_budget_is_capped_per_tier() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let policy = AuthPolicy {
        attempts: 10,
        interval: Duration::from_millis(1),
    };
    let mount = MotionMount::with_policy(link.clone(), Some("9999"), policy).unwrap();

    let err = mount.set_distance(10).await.unwrap_err();
    assert!(matches!(err, MountError::Authentication { .. }), "{err}");
    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 2 * MAX_AUTH_ATTEMPTS as usize);
}

#[tokio::test]
async fn zero_poll_budget_still_checks_once() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let policy = AuthPolicy {
        attempts: 0,
        interval: Duration::from_millis(1),
    };
    let mount = MotionMount::with_policy(link.clone(), Some("2222"), policy).unwrap();

    mount.set_distance(10).await.unwrap();
    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 1);
}

#[tokio::test]
async fn slow_grant_is_picked_up_within_the_poll_budget() {
    let link = MockLink::new()
        .with_pins(Some(1111), Some(2222))
        .with_grant_delay(3);
    let mount = mount(&link, Some("2222"));

    assert!(mount.has_permission(ActionClass::Settings, None).await.unwrap());
    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 4);
}

#[tokio::test]
async fn missing_pin_on_protected_mount_is_an_auth_error() {
    let link = MockLink::new().with_pins(Some(1111), None);
    let mount = mount(&link, None);

    let err = mount.select_preset(PresetTarget::Default).await.unwrap_err();
    assert!(matches!(err, MountError::Authentication { cooldown: 0 }), "{err}");
    assert_eq!(mount.permissions().auth_type, AuthType::Missing);
    assert!(!mount.has_permission(ActionClass::Control, None).await.unwrap());
}

#[tokio::test]
async fn pinless_mount_has_full_access() {
    let link = MockLink::new();
    let mount = mount(&link, None);

    for feature in Feature::ALL {
        assert!(mount
            .has_permission(ActionClass::Settings, Some(feature))
            .await
            .unwrap());
    }
    assert_eq!(mount.permissions().auth_type, AuthType::Full);
}

#[tokio::test]
async fn malformed_pin_is_rejected_at_construction() {
    let err = MotionMount::new(MockLink::new(), Some("12a4")).err().unwrap();
    assert!(matches!(err, MountError::Validation(_)));
}

#[tokio::test]
async fn authentication_can_be_cancelled_between_polls() {
    let link = MockLink::new()
        .with_pins(Some(1111), Some(2222))
        .with_grant_delay(u32::MAX);
    let mount = Arc::new(
        MotionMount::with_policy(
            link.clone(),
            Some("2222"),
            AuthPolicy {
                attempts: 4,
                interval: Duration::from_millis(50),
            },
        )
        .unwrap(),
    );

    let task = {
        let mount = Arc::clone(&mount);
        tokio::spawn(async move { mount.set_distance(30).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    mount.cancel_authentication();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, MountError::Cancelled), "{err}");
    assert!(link.writes_to(DISTANCE_UUID).is_empty());
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn control_tier_without_feature_bit_cannot_rename() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("1111"));

    assert!(!mount
        .has_permission(ActionClass::Settings, Some(Feature::ChangeName))
        .await
        .unwrap());

    link.clear_ops();
    let err = mount.set_name("Den").await.unwrap_err();
    assert!(matches!(err, MountError::PermissionDenied { .. }), "{err}");
    assert!(link.writes_to(NAME_UUID).is_empty());
}

#[tokio::test]
async fn control_tier_follows_feature_bitmask() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let supervisor = mount(&link, Some("2222"));
    supervisor
        .set_multi_pin_features(MultiPinFeatures {
            change_name: true,
            ..MultiPinFeatures::default()
        })
        .await
        .unwrap();
    supervisor.disconnect().await.unwrap();

    let user = mount(&link, Some("1111"));
    user.set_name("Den").await.unwrap();
    assert_eq!(user.state().name, "Den");

    // Full-only settings stay off limits
    let err = user.set_width(60).await.unwrap_err();
    assert!(matches!(err, MountError::PermissionDenied { .. }), "{err}");
    let err = user.set_automove(AutoMove::On(HdmiChannel::Hdmi1)).await.unwrap_err();
    assert!(matches!(err, MountError::PermissionDenied { .. }), "{err}");
}

#[tokio::test]
async fn control_tier_sees_bitmask_changes_made_elsewhere() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("1111"));
    let rename = (ActionClass::Settings, Some(Feature::ChangeName));

    assert!(!mount.has_permission(rename.0, rename.1).await.unwrap());

    // Another client grants the feature while this session stays open
    let grant = MultiPinFeatures {
        change_name: true,
        ..MultiPinFeatures::default()
    };
    link.set_value(MULTI_PIN_FEATURES_UUID, &encode_multi_pin_features(grant));

    assert!(mount.has_permission(rename.0, rename.1).await.unwrap());
    assert!(mount.permissions().change_name);
    assert_eq!(link.writes_to(AUTHENTICATE_UUID).len(), 2);
}

#[tokio::test]
async fn permission_changes_are_broadcast() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("2222"));
    let mut events = mount.subscribe();

    mount.connect().await.unwrap();
    mount.set_distance(5).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), MountEvent::Connection(true));
    match events.recv().await.unwrap() {
        MountEvent::Permissions(p) => assert_eq!(p.auth_type, AuthType::Full),
        other => panic!("unexpected event {other:?}"),
    }
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn out_of_range_values_fail_before_any_io() {
    let link = MockLink::new();
    let mount = mount(&link, None);

    assert!(matches!(mount.set_rotation(150).await, Err(MountError::Validation(_))));
    assert!(matches!(mount.set_distance(101).await, Err(MountError::Validation(_))));
    assert!(matches!(mount.set_width(0).await, Err(MountError::Validation(_))));
    assert!(matches!(mount.set_width(244).await, Err(MountError::Validation(_))));
    assert!(matches!(mount.set_name("").await, Err(MountError::Validation(_))));
    assert!(matches!(
        mount.set_name("A name well over twenty bytes").await,
        Err(MountError::Validation(_))
    ));
    assert!(matches!(mount.delete_preset(7).await, Err(MountError::Validation(_))));
    assert!(matches!(
        mount.select_preset(PresetTarget::Slot(9)).await,
        Err(MountError::Validation(_))
    ));
    assert!(matches!(
        mount.set_automove(AutoMove::Unknown(3)).await,
        Err(MountError::Validation(_))
    ));
    assert!(matches!(
        mount.set_pin(PinTier::Supervisor, "12").await,
        Err(MountError::Validation(_))
    ));
    let long = PresetData {
        name: "x".repeat(33),
        ..cinema()
    };
    assert!(matches!(mount.set_preset(0, long).await, Err(MountError::Validation(_))));

    assert!(link.ops().is_empty());
}

// ============================================================================
// Settings and verification
// ============================================================================

#[tokio::test]
async fn rejected_preset_write_leaves_cache_untouched() {
    let link = MockLink::new();
    let movie = PresetData {
        name: "Movie".to_string(),
        distance: 50,
        rotation: 0,
    };
    store_preset(&link, 3, &movie);
    let mount = mount(&link, None);
    mount.refresh().await.unwrap();

    link.ignore_writes(PRESET_UUIDS[3]);
    link.ignore_writes(PRESET_NAME_UUIDS[3]);
    let err = mount.set_preset(3, cinema()).await.unwrap_err();

    assert!(matches!(err, MountError::SettingNotPersisted { setting: "preset", .. }), "{err}");
    assert_eq!(mount.state().preset(3), Some(&movie));
}

#[tokio::test]
async fn preset_round_trip_through_the_mount() {
    let link = MockLink::new();
    let mount = mount(&link, None);

    let long = PresetData {
        name: "Late night football".to_string(),
        distance: 100,
        rotation: 100,
    };
    mount.set_preset(6, long.clone()).await.unwrap();
    assert_eq!(mount.state().preset(6), Some(&long));

    mount.delete_preset(6).await.unwrap();
    assert_eq!(mount.state().preset(6), None);
    assert_eq!(link.value(PRESET_UUIDS[6]).unwrap(), vec![0; 20]);
    assert_eq!(link.value(PRESET_NAME_UUIDS[6]).unwrap(), vec![0; 17]);
}

#[tokio::test]
async fn automove_writes_the_on_code_for_the_channel() {
    let link = MockLink::new();
    let mount = mount(&link, None);

    let hdmi2 = AutoMove::On(HdmiChannel::Hdmi2);
    mount.set_automove(hdmi2).await.unwrap();

    assert_eq!(link.writes_to(AUTOMOVE_UUID), vec![vec![0x00, 0x04]]);
    assert_eq!(mount.state().automove, hdmi2);
}

#[tokio::test]
async fn unpersisted_width_keeps_previous_value() {
    let link = MockLink::new();
    let mount = mount(&link, None);
    mount.set_width(60).await.unwrap();

    link.ignore_writes(WIDTH_UUID);
    let err = mount.set_width(75).await.unwrap_err();
    assert!(matches!(err, MountError::SettingNotPersisted { setting: "width", .. }), "{err}");
    assert_eq!(mount.state().width, 60);
}

#[tokio::test]
async fn freeze_preset_and_calibration() {
    let link = MockLink::new();
    let mount = mount(&link, None);

    mount.set_freeze_preset(PresetTarget::Slot(2)).await.unwrap();
    assert_eq!(link.value(FREEZE_UUID).unwrap(), vec![3]);
    assert_eq!(mount.state().freeze_preset, PresetTarget::Slot(2));

    mount.start_calibration().await.unwrap();
    assert_eq!(link.writes_to(CALIBRATE_UUID), vec![vec![0x01]]);
}

// ============================================================================
// Control
// ============================================================================

#[tokio::test]
async fn movement_records_requested_values_without_read_back() {
    let link = MockLink::new();
    let mount = mount(&link, None);

    mount.set_distance(40).await.unwrap();
    mount.set_rotation(-30).await.unwrap();
    mount.select_preset(PresetTarget::Slot(0)).await.unwrap();

    let state = mount.state();
    assert_eq!(state.requested_distance, Some(40));
    assert_eq!(state.requested_rotation, Some(-30));
    assert_eq!(link.reads_of(DISTANCE_UUID), 0);
    assert_eq!(link.reads_of(ROTATION_UUID), 0);
    assert_eq!(link.writes_to(SELECT_PRESET_UUID), vec![vec![1]]);
}

#[tokio::test]
async fn notifications_update_position() {
    let link = MockLink::new();
    let mount = mount(&link, None);
    mount.connect().await.unwrap();
    let mut events = mount.subscribe();

    link.notify(DISTANCE_UUID, &encode_distance(42));
    link.notify(ROTATION_UUID, &encode_rotation(-7));

    assert_eq!(events.recv().await.unwrap(), MountEvent::Distance(42));
    assert_eq!(events.recv().await.unwrap(), MountEvent::Rotation(-7));
    let state = mount.state();
    assert_eq!((state.distance, state.rotation), (42, -7));
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn disconnect_while_idle_only_flips_state() {
    let link = MockLink::new();
    let mount = mount(&link, None);
    mount.connect().await.unwrap();
    let mut events = mount.subscribe();

    link.simulate_disconnect();

    assert!(!mount.is_connected());
    assert!(!mount.state().connected);
    assert_eq!(events.recv().await.unwrap(), MountEvent::Connection(false));

    // The next operation reconnects transparently
    mount.set_distance(10).await.unwrap();
    assert!(mount.is_connected());
}

#[tokio::test]
async fn connect_subscribes_to_position() {
    let link = MockLink::new();
    let mount = mount(&link, None);
    mount.connect().await.unwrap();
    mount.connect().await.unwrap();

    let ops = link.ops();
    let connects = ops
        .iter()
        .filter(|op| matches!(op, MockOp::Connect))
        .count();
    assert_eq!(connects, 1);
    assert!(ops.contains(&MockOp::Subscribe(DISTANCE_UUID.to_string())));
    assert!(ops.contains(&MockOp::Subscribe(ROTATION_UUID.to_string())));
}

#[tokio::test]
async fn unreachable_mount_surfaces_device_not_found() {
    let link = MockLink::new();
    link.fail_connect(MountError::DeviceNotFound("AA:BB".to_string()));
    let mount = mount(&link, None);

    let err = mount.refresh().await.unwrap_err();
    assert!(matches!(err, MountError::DeviceNotFound(_)), "{err}");
    assert!(!mount.is_connected());
}

#[tokio::test]
async fn unload_disconnects() {
    let link = MockLink::new();
    let mount = mount(&link, None);
    mount.connect().await.unwrap();
    mount.unload().await.unwrap();
    assert!(!link.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_operations_do_not_interleave_on_the_link() {
    let link = MockLink::new()
        .with_pins(Some(1111), Some(2222))
        .with_grant_delay(2);
    let mount = Arc::new(mount(&link, Some("2222")));

    let width = {
        let mount = Arc::clone(&mount);
        tokio::spawn(async move { mount.set_width(60).await })
    };
    let name = {
        let mount = Arc::clone(&mount);
        tokio::spawn(async move { mount.set_name("Den").await })
    };
    width.await.unwrap().unwrap();
    name.await.unwrap().unwrap();

    let ops = link.ops();
    let connects = ops.iter().filter(|op| matches!(op, MockOp::Connect)).count();
    assert_eq!(connects, 1);
    assert_eq!(link.writes_to(AUTHENTICATE_UUID).len(), 1);

    // Handshake first, then each write directly followed by its read-back
    let settings: Vec<&MockOp> = ops
        .iter()
        .skip_while(|op| {
            !matches!(op, MockOp::Write(uuid, _) if uuid == WIDTH_UUID || uuid == NAME_UUID)
        })
        .collect();
    assert_eq!(settings.len(), 4, "{ops:?}");
    for pair in settings.chunks(2) {
        match pair {
            [MockOp::Write(written, _), MockOp::Read(read)] => assert_eq!(written, read),
            other => panic!("interleaved requests: {other:?}"),
        }
    }
}

#[tokio::test]
async fn mounts_do_not_share_state() {
    let a = MockLink::new();
    let b = MockLink::new();
    let first = mount(&a, None);
    let second = mount(&b, None);

    first.set_name("Lounge").await.unwrap();
    second.set_name("Bedroom").await.unwrap();

    assert_eq!(first.state().name, "Lounge");
    assert_eq!(second.state().name, "Bedroom");
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn refresh_rebuilds_the_whole_state() {
    let link = MockLink::new();
    store_preset(&link, 1, &cinema());
    link.set_value(AUTOMOVE_UUID, &[0x00, 0x09]);
    let mount = mount(&link, None);

    let state = mount.refresh().await.unwrap();

    assert!(state.connected);
    assert_eq!(state.name, "MotionMount");
    assert_eq!(state.width, 55);
    assert_eq!(state.presets.len(), 7);
    assert_eq!(state.preset(1), Some(&cinema()));
    assert!(!state.presets[&0].is_occupied());
    assert_eq!(state.automove, AutoMove::Off(HdmiChannel::Hdmi3));
    assert_eq!(state.pin_setting, PinSetting::Deactivated);
    assert_eq!(state.versions.mcp_fw, "3.7");
    assert_eq!(state.permissions.auth_type, AuthType::Full);
    assert_eq!(*mount.watch().borrow(), state);
}

#[tokio::test]
async fn unknown_automove_code_is_reported_not_guessed() {
    let link = MockLink::new();
    link.set_value(AUTOMOVE_UUID, &[0x00, 0x03]);
    let mount = mount(&link, None);

    let state = mount.refresh().await.unwrap();
    assert_eq!(state.automove, AutoMove::Unknown(3));
}

#[tokio::test]
async fn refresh_retries_transient_failures() {
    let link = MockLink::new();
    link.fail_reads(2);
    let mount = mount(&link, None);

    let policy = RetryPolicy {
        attempts: 3,
        backoff: Duration::from_millis(1),
    };
    let state = mount.refresh_with_retry(&policy).await.unwrap();
    assert_eq!(state.name, "MotionMount");
}

#[tokio::test]
async fn refresh_retry_gives_up_after_budget() {
    let link = MockLink::new();
    link.fail_reads(10);
    let mount = mount(&link, None);

    let policy = RetryPolicy {
        attempts: 2,
        backoff: Duration::from_millis(1),
    };
    let err = mount.refresh_with_retry(&policy).await.unwrap_err();
    assert!(matches!(err, MountError::Connection(_)), "{err}");
}

#[tokio::test]
async fn refresh_retry_does_not_retry_authentication() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("9999"));

    let policy = RetryPolicy {
        attempts: 5,
        backoff: Duration::from_millis(1),
    };
    let err = mount.refresh_with_retry(&policy).await.unwrap_err();
    assert!(matches!(err, MountError::Authentication { .. }), "{err}");
    assert_eq!(link.reads_of(AUTH_STATUS_UUID), 8);
}

// ============================================================================
// PIN management
// ============================================================================

#[tokio::test]
async fn set_pin_walks_through_pin_modes() {
    let link = MockLink::new();
    let mount = mount(&link, None);

    mount.set_pin(PinTier::AuthorizedUser, "1234").await.unwrap();
    assert_eq!(mount.state().pin_setting, PinSetting::Single);
    // A lone PIN still grants full access
    assert_eq!(mount.permissions().auth_type, AuthType::Full);

    mount.set_pin(PinTier::Supervisor, "2222").await.unwrap();
    let state = mount.state();
    assert_eq!(state.pin_setting, PinSetting::Multi);
    assert_eq!(state.permissions.auth_type, AuthType::Control);

    // Changing PINs is supervisor-only
    let err = mount.set_pin(PinTier::Supervisor, "0000").await.unwrap_err();
    assert!(matches!(err, MountError::PermissionDenied { .. }), "{err}");
}

#[tokio::test]
async fn removing_own_supervisor_pin_drops_to_single_mode() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("2222"));

    // The change lands, but the stored PIN no longer unlocks the mount
    let err = mount.set_pin(PinTier::Supervisor, "0000").await.unwrap_err();
    match &err {
        MountError::RefreshAfterPinChange(inner) => {
            assert!(matches!(**inner, MountError::Authentication { .. }), "{inner}");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(err.is_persistent());
    let state = mount.state();
    assert_eq!(state.pin_setting, PinSetting::Single);
    assert_eq!(state.permissions.auth_type, AuthType::Wrong);
    assert!(!mount.has_permission(ActionClass::Control, None).await.unwrap());
}

#[tokio::test]
async fn removing_the_user_pin_deactivates_protection() {
    let link = MockLink::new().with_pins(Some(1111), Some(2222));
    let mount = mount(&link, Some("2222"));

    mount.set_pin(PinTier::AuthorizedUser, "0000").await.unwrap();
    let state = mount.state();
    assert_eq!(state.pin_setting, PinSetting::Deactivated);
    assert_eq!(state.permissions.auth_type, AuthType::Full);
}

#[tokio::test]
async fn state_serializes_for_diagnostics() {
    let link = MockLink::new();
    let mount = mount(&link, None);
    let state = mount.refresh().await.unwrap();

    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["name"], "MotionMount");
    assert_eq!(json["permissions"]["auth_type"], "full");
    assert_eq!(json["presets"].as_object().unwrap().len(), 7);
}
