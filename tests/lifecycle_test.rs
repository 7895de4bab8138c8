//! Scoped open/close of the system, interfaces and cameras.

#[cfg(test)]
mod lifecycle_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use vmbcam::invariants::{
        clear_invariant_log, contract_test, CLOSED_HAS_NO_FEATURES, CLOSED_HAS_NO_HANDLE,
        OPEN_HAS_HANDLE,
    };
    use vmbcam::native::NativeErrorCode;
    use vmbcam::prelude::*;
    use vmbcam::testing::{
        camera_info, interface_info, SettingsOp, SimFeature, SimTarget, SimulatedApi,
    };
    use vmbcam::{InterfaceType, PersistSettings, PersistType};

    fn setup() -> (Arc<SimulatedApi>, Arc<System>) {
        let sim = Arc::new(SimulatedApi::new());
        sim.add_interface(
            interface_info("IF_1"),
            vec![SimFeature::string("InterfaceLabel", "eth0", 32).read_only()],
        );
        sim.add_camera(
            camera_info("DEV_1", "IF_1"),
            vec![
                SimFeature::int("Height", 480, (1, 4096), 1),
                SimFeature::string("DeviceID", "DEV_1", 64).read_only(),
            ],
        );
        let system = System::new(sim.clone());
        (sim, system)
    }

    #[test]
    fn test_closed_system_exposes_nothing() {
        let (sim, system) = setup();
        assert!(!system.is_open());
        assert!(system.get_all_features().is_empty());
        assert!(system.get_all_cameras().is_empty());
        assert!(system.get_camera_by_id("DEV_1").unwrap_err().is_lookup_error());
        assert_eq!(sim.call_count("startup"), 0);
    }

    #[test]
    fn test_nested_enter_exit() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let target = SimTarget::camera("DEV_1");

        camera.enter().unwrap();
        camera.enter().unwrap();
        assert_eq!(sim.call_count("camera_open"), 1);
        assert_eq!(sim.open_handle_count(&target), 1);

        let height = camera.get_feature_by_name("Height").unwrap();
        camera.exit().unwrap();
        assert!(camera.is_open());
        assert_eq!(height.as_int().unwrap().get().unwrap(), 480);

        camera.exit().unwrap();
        assert!(!camera.is_open());
        assert!(camera.get_all_features().is_empty());
        assert_eq!(sim.call_count("camera_close"), 1);
        assert_eq!(sim.open_handle_count(&target), 0);
    }

    #[test]
    fn test_exit_without_enter_is_rejected() {
        let (_sim, system) = setup();
        let err = system.exit().unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));
        assert!(!system.is_open());
    }

    #[test]
    fn test_guard_exits_on_drop() {
        let (sim, system) = setup();
        {
            let sys = system.open().unwrap();
            assert!(sys.is_open());
            let camera = sys.get_camera_by_id("DEV_1").unwrap();
            let cam = camera.open().unwrap();
            assert_eq!(cam.get_all_features().len(), 2);
        }
        assert!(!system.is_open());
        assert_eq!(sim.call_count("camera_close"), 1);
        assert_eq!(sim.call_count("shutdown"), 1);
    }

    #[test]
    fn test_guard_close_reports_errors() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();

        let cam = camera.open().unwrap();
        sim.fail_next_call("camera_close", NativeErrorCode::InternalFault);
        let err = cam.close().unwrap_err();
        assert_eq!(err.native_code(), Some(NativeErrorCode::InternalFault));

        // A failed close still leaves the camera closed and empty.
        assert!(!camera.is_open());
        assert!(camera.get_all_features().is_empty());
    }

    #[test]
    fn test_accessor_goes_stale_after_close() {
        let (_sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();

        let height = {
            let cam = camera.open().unwrap();
            cam.get_feature_by_name("Height").unwrap()
        };

        let err = height.as_int().unwrap().get().unwrap_err();
        assert!(err.is_stale_handle());
        assert!(height.as_int().unwrap().set(10).unwrap_err().is_stale_handle());

        // Reopening builds fresh accessors; the old one stays stale.
        let cam = camera.open().unwrap();
        let fresh = cam.get_feature_by_name("Height").unwrap();
        assert!(!Arc::ptr_eq(&height, &fresh));
        assert_eq!(fresh.as_int().unwrap().get().unwrap(), 480);
        assert!(height.as_int().unwrap().get().unwrap_err().is_stale_handle());
    }

    #[test]
    fn test_discovery_failure_leaves_camera_closed() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();

        sim.fail_next_call("features_list", NativeErrorCode::Resources);
        let err = camera.enter().unwrap_err();
        assert!(err.is_discovery_error());
        assert_eq!(err.native_code(), Some(NativeErrorCode::Resources));
        assert!(!camera.is_open());
        assert_eq!(sim.open_handle_count(&SimTarget::camera("DEV_1")), 0);

        camera.enter().unwrap();
        assert_eq!(camera.get_all_features().len(), 2);
        camera.exit().unwrap();
    }

    #[test]
    fn test_shrinking_feature_list() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();

        sim.shrink_next_list(1);
        let cam = camera.open().unwrap();
        let features = cam.get_all_features();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].get_name(), "Height");
    }

    #[test]
    fn test_access_mode_rules() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        assert_eq!(camera.get_access_mode(), AccessMode::Full);
        assert_eq!(
            camera.get_permitted_access_modes(),
            vec![AccessMode::Full, AccessMode::Read, AccessMode::Config]
        );

        camera.set_access_mode(AccessMode::Lite).unwrap();
        let err = camera.enter().unwrap_err();
        assert!(matches!(err, CameraError::InitializationError(_)));
        assert!(err.to_string().contains("Valid modes are"));
        assert!(!camera.is_open());

        camera.set_access_mode(AccessMode::Read).unwrap();
        let cam = camera.open().unwrap();
        assert!(matches!(
            cam.set_access_mode(AccessMode::Full),
            Err(CameraError::InvalidArgument(_))
        ));
        assert_eq!(cam.get_access_mode(), AccessMode::Read);
        drop(cam);

        assert_eq!(sim.call_count("camera_open"), 2);
    }

    #[test]
    fn test_capture_timeout() {
        let (_sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();

        assert_eq!(camera.get_capture_timeout(), Duration::from_millis(2000));
        camera.set_capture_timeout(Duration::from_millis(150)).unwrap();
        assert_eq!(camera.get_capture_timeout(), Duration::from_millis(150));
        assert!(matches!(
            camera.set_capture_timeout(Duration::ZERO),
            Err(CameraError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_system_defaults_apply_to_discovered_cameras() {
        let (_sim, system) = setup();
        system.set_default_access_mode(AccessMode::Config);
        system
            .set_default_capture_timeout(Duration::from_millis(750))
            .unwrap();

        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        assert_eq!(camera.get_access_mode(), AccessMode::Config);
        assert_eq!(camera.get_capture_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_interface_open_and_lookup() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();

        let interface = system.get_interface_by_id("IF_1").unwrap();
        assert_eq!(interface.get_type(), InterfaceType::Ethernet);
        assert!(system.get_interface_by_id("IF_9").unwrap_err().is_lookup_error());

        let cameras = system.get_cameras_by_interface(&interface);
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].get_id(), "DEV_1");

        {
            let inter = interface.open().unwrap();
            let label = inter.get_feature_by_name("InterfaceLabel").unwrap();
            assert_eq!(label.as_string().unwrap().get().unwrap(), "eth0");
            assert_eq!(sim.open_handle_count(&SimTarget::interface("IF_1")), 1);
        }
        assert!(!interface.is_open());
        assert_eq!(sim.open_handle_count(&SimTarget::interface("IF_1")), 0);
    }

    #[test]
    fn test_settings_round_trip() {
        let (sim, system) = setup();
        let dir = tempdir().unwrap();
        let path = dir.path().join("camera.xml");
        let settings = PersistSettings::new(PersistType::NoLut).with_max_iterations(3);

        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();

        let err = camera.save_settings(&path, &settings).unwrap_err();
        assert!(matches!(err, CameraError::InitializationError(_)));

        let cam = camera.open().unwrap();
        cam.save_settings(&path, &settings).unwrap();
        assert!(path.exists());
        cam.load_settings(&path, &settings).unwrap();

        let calls = sim.settings_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, SettingsOp::Save);
        assert_eq!(calls[1].op, SettingsOp::Load);
        assert_eq!(calls[1].target, SimTarget::camera("DEV_1"));
        assert_eq!(calls[1].settings, settings);
    }

    #[test]
    fn test_settings_path_validation() {
        let (sim, system) = setup();
        let dir = tempdir().unwrap();
        let _sys = system.open().unwrap();
        let settings = PersistSettings::default();

        let err = system
            .save_settings(&dir.path().join("system.json"), &settings)
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));

        let err = system
            .load_settings(&dir.path().join("missing.xml"), &settings)
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));
        assert!(sim.settings_calls().is_empty());
    }

    #[test]
    fn test_system_close_shuts_down_native_layer() {
        let (sim, system) = setup();
        system.enter().unwrap();
        system.enter().unwrap();
        assert_eq!(sim.call_count("startup"), 1);
        assert!(sim.active_subscriptions() > 0);

        system.exit().unwrap();
        assert_eq!(sim.call_count("shutdown"), 0);
        system.exit().unwrap();
        assert_eq!(sim.call_count("shutdown"), 1);
        assert_eq!(sim.active_subscriptions(), 0);
        assert!(system.get_all_cameras().is_empty());
        assert!(system.get_all_interfaces().is_empty());
    }

    #[test]
    fn test_startup_failure_is_reported() {
        let (sim, system) = setup();
        sim.fail_next_call("startup", NativeErrorCode::NoTransportLayer);
        let err = system.enter().unwrap_err();
        assert_eq!(err.native_code(), Some(NativeErrorCode::NoTransportLayer));
        assert!(!system.is_open());
    }

    #[test]
    fn contract_context_lifecycle() {
        clear_invariant_log();
        let (_sim, system) = setup();
        {
            let _sys = system.open().unwrap();
            let camera = system.get_camera_by_id("DEV_1").unwrap();
            let _cam = camera.open().unwrap();
        }
        contract_test(
            "context lifecycle",
            &[OPEN_HAS_HANDLE, CLOSED_HAS_NO_FEATURES, CLOSED_HAS_NO_HANDLE],
        );
    }

    #[test]
    fn test_concurrent_enter_exit_on_one_camera() {
        const THREADS: usize = 8;
        const CYCLES: usize = 300;

        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let empty_while_entered = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                let (camera, empty) = (&camera, &empty_while_entered);
                scope.spawn(move || {
                    for _ in 0..CYCLES {
                        camera.enter().unwrap();
                        if camera.get_all_features().is_empty() {
                            empty.fetch_add(1, Ordering::SeqCst);
                        }
                        camera.exit().unwrap();
                    }
                });
            }
        });

        assert_eq!(empty_while_entered.load(Ordering::SeqCst), 0);
        assert!(!camera.is_open());
        assert!(camera.get_all_features().is_empty());
        assert_eq!(sim.open_handle_count(&SimTarget::camera("DEV_1")), 0);
        assert_eq!(sim.open_handle_count(&SimTarget::local_device("DEV_1")), 0);
        assert_eq!(sim.call_count("camera_open"), sim.call_count("camera_close"));
    }

    #[test]
    fn test_exit_after_system_shutdown_reports_stale_handle() {
        let (sim, system) = setup();
        system.enter().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        camera.enter().unwrap();

        system.exit().unwrap();
        assert_eq!(sim.call_count("shutdown"), 1);

        let err = camera.exit().unwrap_err();
        assert!(err.is_stale_handle(), "{}", err);
        assert!(!camera.is_open());
        assert!(camera.get_all_features().is_empty());
    }

    #[test]
    fn test_interface_exit_after_system_shutdown_reports_stale_handle() {
        let (_sim, system) = setup();
        system.enter().unwrap();
        let interface = system.get_interface_by_id("IF_1").unwrap();
        interface.enter().unwrap();

        system.exit().unwrap();
        assert!(interface.exit().unwrap_err().is_stale_handle());
        assert!(!interface.is_open());
    }
}
