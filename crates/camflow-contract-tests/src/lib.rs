#![forbid(unsafe_code)]


#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use camflow_core::{CamflowConfig, EngineError, ScaleType, Size, VideoType};

    // ---- Golden fixtures (JSON contracts) ----
    const CONFIG_FULL_JSON: &str = include_str!("../fixtures/config_full.json");
    const CONFIG_EMPTY_JSON: &str = include_str!("../fixtures/config_empty.json");
    const CONFIG_BAD_HOLD_JSON: &str = include_str!("../fixtures/config_bad_hold.json");
    const CONFIG_BAD_PRESET_JSON: &str = include_str!("../fixtures/config_bad_preset.json");

    fn write_temp_fixture(name: &str, contents: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("camflow_contract_tests_{name}_{ts}.json"));
        fs::write(&p, contents).expect("write fixture");
        p
    }

    #[test]
    fn golden_config_full_deserializes() {
        let path = write_temp_fixture("config_full", CONFIG_FULL_JSON);
        let cfg = CamflowConfig::from_json_path(&path).expect("config_full.json should parse");

        assert_eq!(cfg.camera.video_type, VideoType::P1080);
        assert_eq!(cfg.camera.scale_type, ScaleType::CenterCrop);
        assert!(cfg.camera.landscape);
        assert_eq!(cfg.camera.data_size(Size::new(1920, 1080)), Size::new(1920, 1080));
        assert_eq!(cfg.recording.expected_tracks(), 1);
        assert_eq!(cfg.recording.file_prefix, "drive");
        assert_eq!(
            cfg.recording.output_path(1_700_000_000),
            PathBuf::from("recordings").join("drive_1700000000.mp4")
        );
        assert_eq!(cfg.capture.thumbnail, 96);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_config_empty_is_all_defaults() {
        let path = write_temp_fixture("config_empty", CONFIG_EMPTY_JSON);
        let cfg = CamflowConfig::from_json_path(&path).expect("{} is a valid config");
        assert_eq!(cfg, CamflowConfig::default());

        // Portrait by default: the sensor's landscape size arrives rotated.
        assert!(!cfg.camera.landscape);
        assert_eq!(cfg.camera.data_size(Size::new(1280, 720)), Size::new(720, 1280));
        assert_eq!(cfg.recording.expected_tracks(), 2);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_config_bad_hold_is_rejected() {
        let path = write_temp_fixture("config_bad_hold", CONFIG_BAD_HOLD_JSON);
        let err = CamflowConfig::from_json_path(&path).expect_err("inverted hold range must fail");
        assert!(matches!(err, EngineError::InvalidConfig { .. }), "got: {err}");
        assert!(err.to_string().contains("hold_ms"), "got: {err}");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_config_bad_preset_is_rejected() {
        let path = write_temp_fixture("config_bad_preset", CONFIG_BAD_PRESET_JSON);
        let err = CamflowConfig::from_json_path(&path).expect_err("unknown preset must fail");
        assert!(matches!(err, EngineError::Json { .. }), "got: {err}");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("camflow_contract_tests_does_not_exist.json");
        let cfg = CamflowConfig::load_or_default(&path).expect("absent file is not an error");
        assert_eq!(cfg, CamflowConfig::default());
    }
}
