use telwatch::{decode_frame, DecodeError, EventKind, SessionParam};

#[test]
fn session_frames_decode_with_all_fields() {
    let frame = br#"{
        "timestamp": 1700000000,
        "event_type": 2,
        "event_param": 7,
        "event_value_str": "0,0,3,5",
        "l3_session_id": 101,
        "l4_session_id": 202,
        "interface_type": 1,
        "interface_id_type": 1,
        "interface_id": "89470000140710276612",
        "network_address_family": 2,
        "network_address": "192.168.0.153/24",
        "network_provider": 24201,
        "signal_strength": -99
    }"#;
    let event = decode_frame(frame).unwrap();
    assert_eq!(event.timestamp, 1_700_000_000);
    assert_eq!(event.sequence, 0); // stamped later, by the bus
    let EventKind::Session(session) = event.kind else {
        panic!("expected session event");
    };
    assert_eq!(session.param, SessionParam::StateUpdate);
    assert_eq!(session.value_text.as_deref(), Some("0,0,3,5"));
    assert_eq!(session.l3_session_id, 101);
    assert_eq!(session.l4_session_id, 202);
    assert_eq!(session.network_provider, Some(24201));
    assert_eq!(session.signal_strength, Some(-99));
}

#[test]
fn position_frames_tolerate_missing_optionals() {
    let frame = br#"{
        "event_type": 4,
        "latitude": 59.91,
        "longitude": 10.75,
        "nmea_string": "$GPGGA,190406.0,5103.732280,N,01701.493660,E,1,05,1.7,130.0,M,42.0,M,,*53"
    }"#;
    let event = decode_frame(frame).unwrap();
    assert_eq!(event.timestamp, 0); // bus will stamp it
    let EventKind::Position(fix) = event.kind else {
        panic!("expected position event");
    };
    assert_eq!(fix.latitude, 59.91);
    assert_eq!(fix.longitude, 10.75);
    assert_eq!(fix.altitude, None);
    assert_eq!(fix.speed, None);
    assert!(fix.raw_sentence.unwrap().starts_with("$GPGGA"));
}

#[test]
fn frames_without_a_type_pass_through_as_relay_payloads() {
    let event = decode_frame(br#"{"topic": "node.custom", "body": [1, 2, 3]}"#).unwrap();
    let EventKind::Relay(frame) = event.kind else {
        panic!("expected relay frame");
    };
    assert_eq!(frame.payload["topic"], "node.custom");
}

#[test]
fn monitor_and_system_frames_keep_their_payload() {
    let monitor = decode_frame(br#"{"event_type": 5, "cpu": 0.7}"#).unwrap();
    assert!(matches!(monitor.kind, EventKind::Monitor(_)));

    let system = decode_frame(br#"{"event_type": 6, "event": "reboot"}"#).unwrap();
    let EventKind::System(system) = system.kind else {
        panic!("expected system event");
    };
    assert_eq!(system.payload["event"], "reboot");
}

#[test]
fn malformed_frames_are_rejected() {
    assert!(matches!(
        decode_frame(b"not json"),
        Err(DecodeError::Json(_))
    ));
    assert!(matches!(decode_frame(b"[1,2]"), Err(DecodeError::NotAnObject)));
    assert!(matches!(
        decode_frame(br#"{"event_type": 99}"#),
        Err(DecodeError::UnknownType(99))
    ));
    assert!(matches!(
        decode_frame(br#"{"event_type": 2, "event_param": 7}"#),
        Err(DecodeError::MissingField("l3_session_id"))
    ));
    assert!(matches!(
        decode_frame(br#"{"event_type": 4, "latitude": 1.0}"#),
        Err(DecodeError::MissingField("longitude"))
    ));
    assert!(matches!(
        decode_frame(
            br#"{"event_type": 2, "event_param": 42, "l3_session_id": 1,
                 "interface_id": "a", "network_address": "b"}"#
        ),
        Err(DecodeError::BadField("event_param"))
    ));
}
