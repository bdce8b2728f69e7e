use epm_analyzer::session::keys;
use epm_analyzer::{
    AnalysisParams, DevicePreference, EngineKind, EngineParams, RunConfig, SessionState, Zone,
    ZoneSet,
};

fn config() -> RunConfig {
    RunConfig {
        video_path: "/videos/rat_07.mp4".to_string(),
        start_s: 12.5,
        end_s: 312.5,
        engine: EngineKind::Pose,
        engine_params: EngineParams::default(),
        zone_set: ZoneSet::new(vec![
            Zone::new("Brazo Abierto 1", 0.0, 410.5, 610.0, 120.25),
            Zone::new("Brazo Cerrado 1", 610.0, 0.0, 120.25, 410.5),
            Zone::new("Centro", 610.0, 410.5, 120.25, 120.25),
        ])
        .expect("valid zones"),
        device: DevicePreference::Cpu,
        analysis: AnalysisParams::default(),
    }
}

#[test]
fn run_config_round_trips_through_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.json");
    let cfg = config();

    {
        let mut session = SessionState::new(&path);
        session.set(keys::LOGGED_IN, true).expect("login");
        session.store_run_config(&cfg).expect("store");
    }

    let restored = SessionState::open(&path).expect("reopen");
    assert_eq!(restored.get(keys::LOGGED_IN), Some(&serde_json::json!(true)));
    assert_eq!(
        restored.video_path().expect("decode").as_deref(),
        Some("/videos/rat_07.mp4")
    );
    assert_eq!(restored.saved_trim().expect("decode"), Some((12.5, 312.5)));
    assert_eq!(restored.saved_zone_set().expect("decode"), Some(cfg.zone_set.clone()));
    assert_eq!(
        restored.device_preference().expect("decode"),
        Some(DevicePreference::Cpu)
    );
}

#[test]
fn drawing_tool_zone_shape_is_accepted_from_session() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.json");
    std::fs::write(
        &path,
        r#"{"zone_set": [{"Nombre Zona": "Centro", "left": 5, "top": 6, "width": 7, "height": 8}]}"#,
    )
    .expect("write session");
    let session = SessionState::open(&path).expect("open");
    let zones = session.saved_zone_set().expect("decode").expect("zones");
    assert_eq!(zones.zones()[0], Zone::new("Centro", 5.0, 6.0, 7.0, 8.0));
}

#[test]
fn partial_trim_is_treated_as_unset() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = SessionState::new(dir.path().join("session.json"));
    session.set(keys::TRIM_START_S, 3.0).expect("write");
    assert_eq!(session.saved_trim().expect("decode"), None);
}
