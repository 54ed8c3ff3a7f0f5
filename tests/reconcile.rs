use telwatch::{
    packed_state_field, MetaStore, Reconciler, RowIdentity, SessionEvent, SessionParam,
    SharedSequence, FIRST_OBSERVATION_WINDOW_SECS,
};

fn update(l3: u64, state_text: &str) -> SessionEvent {
    SessionEvent {
        param: SessionParam::StateUpdate,
        value: None,
        value_text: Some(state_text.to_string()),
        l3_session_id: l3,
        l4_session_id: 2,
        interface_kind: 1,
        interface_id_kind: 1,
        interface_id: "89470000140710276612".to_string(),
        network_address_family: 2,
        network_address: "192.168.0.153/24".to_string(),
        network_provider: Some(24201),
        signal_strength: Some(-89),
    }
}

fn identity() -> RowIdentity {
    RowIdentity {
        node_id: 1,
        boot: None,
    }
}

fn mode_events(store: &MetaStore) -> Vec<i64> {
    store
        .network_events_since(0)
        .unwrap()
        .into_iter()
        .filter(|row| row.event_param == SessionParam::ModeUpdate.code())
        .map(|row| row.event_value.unwrap())
        .collect()
}

fn quality_events(store: &MetaStore) -> Vec<i64> {
    store
        .network_events_since(0)
        .unwrap()
        .into_iter()
        .filter(|row| row.event_param == SessionParam::QualityUpdate.code())
        .map(|row| row.event_value.unwrap())
        .collect()
}

#[test]
fn mode_transitions_synthesize_exactly_once_per_change() {
    let store = MetaStore::open_in_memory().unwrap();
    let mut reconciler = Reconciler::new(SharedSequence::new());
    let identity = identity();

    // 3G, 3G, 4G, 4G, 3G within the first-observation window.
    let modes = [3, 3, 4, 4, 3];
    for (step, mode) in modes.iter().enumerate() {
        let event = update(10, &format!("0,0,{mode},5"));
        reconciler
            .apply_update(&store, &identity, &event, 100 + step as u64, 0, 1_000)
            .unwrap();
    }

    // First observation plus the two actual changes, never more.
    assert_eq!(mode_events(&store), vec![3, 4, 3]);
    // Quality never changed after the initial snapshot.
    assert_eq!(quality_events(&store), vec![5]);
    assert_eq!(store.session_state_count().unwrap(), 1);
}

#[test]
fn first_observation_emits_a_complete_initial_snapshot() {
    let store = MetaStore::open_in_memory().unwrap();
    let mut reconciler = Reconciler::new(SharedSequence::new());

    let outcome = reconciler
        .apply_update(&store, &identity(), &update(1, "0,0,2,7"), 50, 0, 1_000)
        .unwrap();

    assert!(outcome.first_observation);
    assert_eq!(outcome.synthesized, 2);
    assert_eq!(mode_events(&store), vec![2]);
    assert_eq!(quality_events(&store), vec![7]);
}

#[test]
fn absent_packed_fields_synthesize_nothing() {
    let store = MetaStore::open_in_memory().unwrap();
    let mut reconciler = Reconciler::new(SharedSequence::new());

    let outcome = reconciler
        .apply_update(&store, &identity(), &update(1, "0,0,,"), 50, 0, 1_000)
        .unwrap();

    assert!(outcome.first_observation);
    assert_eq!(outcome.synthesized, 0);
}

#[test]
fn window_expiry_stops_first_observation_but_not_change_synthesis() {
    let store = MetaStore::open_in_memory().unwrap();
    let mut reconciler = Reconciler::new(SharedSequence::new());
    let identity = identity();

    // Starts the window and synthesizes the initial snapshot.
    reconciler
        .apply_update(&store, &identity, &update(1, "0,0,3,5"), 100, 0, 1_000)
        .unwrap();

    // Well past the window: a new session no longer produces
    // first-observation events.
    let late = 1_000 + FIRST_OBSERVATION_WINDOW_SECS + 1;
    let outcome = reconciler
        .apply_update(&store, &identity, &update(2, "0,0,4,6"), 200, 0, late)
        .unwrap();
    assert!(outcome.first_observation);
    assert_eq!(outcome.synthesized, 0);

    // A genuine transition on a known session still synthesizes.
    let outcome = reconciler
        .apply_update(&store, &identity, &update(1, "0,0,4,5"), 300, 0, late + 10)
        .unwrap();
    assert!(!outcome.first_observation);
    assert_eq!(outcome.synthesized, 1);
    assert_eq!(mode_events(&store), vec![3, 4]);
}

#[test]
fn synthetic_events_draw_from_the_shared_sequence() {
    let store = MetaStore::open_in_memory().unwrap();
    let sequence = SharedSequence::new();
    let mut reconciler = Reconciler::new(sequence.clone());

    sequence.next(); // an organic event took 1
    reconciler
        .apply_update(&store, &identity(), &update(1, "0,0,3,5"), 100, 1, 1_000)
        .unwrap();
    let organic = sequence.next();

    let rows = store.network_events_since(0).unwrap();
    let mut synthetic: Vec<u32> = rows.iter().map(|row| row.sequence).collect();
    synthetic.sort_unstable();
    assert_eq!(synthetic, vec![2, 3]);
    assert_eq!(organic, 4);
}

#[test]
fn packed_state_parsing_is_strictly_positional() {
    assert_eq!(packed_state_field("1,2,3,4", 2), Some(3));
    assert_eq!(packed_state_field("1,2,3,4", 3), Some(4));
    assert_eq!(packed_state_field("1,2,,4", 2), None);
    assert_eq!(packed_state_field("1,2,3", 2), None); // too few fields
    assert_eq!(packed_state_field("1,2,3,4,5", 2), None); // too many fields
    assert_eq!(packed_state_field("1,2,x,4", 2), None);
    assert_eq!(packed_state_field("", 2), None);
    assert_eq!(packed_state_field("1,2,3,4", 9), None);
}
