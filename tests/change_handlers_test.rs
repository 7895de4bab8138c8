//! Change notification: registration, fan-out and reentrancy.

#[cfg(test)]
mod change_handler_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use vmbcam::prelude::*;
    use vmbcam::testing::{camera_info, SimFeature, SimTarget, SimulatedApi};

    fn setup() -> (Arc<SimulatedApi>, Arc<System>) {
        let sim = Arc::new(SimulatedApi::new());
        sim.add_camera(
            camera_info("DEV_1", "IF_1"),
            vec![
                SimFeature::int("Height", 480, (1, 4096), 1),
                SimFeature::int("Width", 640, (8, 4096), 8),
                SimFeature::float("Gain", 0.0, (0.0, 24.0), Some(0.1)),
            ],
        );
        let system = System::new(sim.clone());
        (sim, system)
    }

    fn counting_handler() -> (ChangeHandler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = ChangeHandler::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handler, calls)
    }

    #[test]
    fn test_handler_sees_set_and_device_changes() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let handler = ChangeHandler::new(move |feature| {
            let value = feature.as_int().unwrap().get().unwrap();
            log.lock().unwrap().push((feature.get_name().to_string(), value));
        });

        let height = camera.get_feature_by_name("Height").unwrap();
        height.register_change_handler(&handler).unwrap();

        height.as_int().unwrap().set(600).unwrap();
        sim.flush();
        sim.poke(&SimTarget::camera("DEV_1"), "Height", 720i64).unwrap();
        sim.flush();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("Height".to_string(), 600), ("Height".to_string(), 720)]
        );
    }

    #[test]
    fn test_duplicate_registration_is_called_once() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let (handler, calls) = counting_handler();
        let height = camera.get_feature_by_name("Height").unwrap();
        height.register_change_handler(&handler).unwrap();
        height.register_change_handler(&handler.clone()).unwrap();
        assert_eq!(height.change_handler_count(), 1);

        height.as_int().unwrap().set(100).unwrap();
        sim.flush();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let handlers: Vec<ChangeHandler> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                ChangeHandler::new(move |_| order.lock().unwrap().push(i))
            })
            .collect();

        let width = camera.get_feature_by_name("Width").unwrap();
        for handler in &handlers {
            width.register_change_handler(handler).unwrap();
        }

        width.as_int().unwrap().set(800).unwrap();
        sim.flush();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_native_subscription_follows_handler_count() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();
        let target = SimTarget::camera("DEV_1");

        let (first, first_calls) = counting_handler();
        let (second, _) = counting_handler();
        let gain = camera.get_feature_by_name("Gain").unwrap();
        assert!(!sim.is_subscribed(&target, "Gain"));

        // The system holds subscriptions of its own; count only what Gain adds.
        let registered = sim.call_count("feature_invalidation_register");
        let unregistered = sim.call_count("feature_invalidation_unregister");

        gain.register_change_handler(&first).unwrap();
        gain.register_change_handler(&second).unwrap();
        assert!(sim.is_subscribed(&target, "Gain"));
        assert_eq!(sim.call_count("feature_invalidation_register") - registered, 1);

        gain.unregister_change_handler(&second).unwrap();
        assert!(sim.is_subscribed(&target, "Gain"));
        assert_eq!(sim.call_count("feature_invalidation_unregister") - unregistered, 0);

        gain.unregister_change_handler(&first).unwrap();
        assert!(!sim.is_subscribed(&target, "Gain"));
        assert_eq!(sim.call_count("feature_invalidation_unregister") - unregistered, 1);

        // Unknown handlers are ignored.
        gain.unregister_change_handler(&first).unwrap();

        gain.as_float().unwrap().set(6.0).unwrap();
        sim.flush();
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister_all() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let (a, a_calls) = counting_handler();
        let (b, b_calls) = counting_handler();
        let height = camera.get_feature_by_name("Height").unwrap();
        height.register_change_handler(&a).unwrap();
        height.register_change_handler(&b).unwrap();

        height.unregister_all_change_handlers().unwrap();
        assert_eq!(height.change_handler_count(), 0);
        assert!(!sim.is_subscribed(&SimTarget::camera("DEV_1"), "Height"));

        sim.fire(&SimTarget::camera("DEV_1"), "Height");
        sim.flush();
        assert_eq!(a_calls.load(Ordering::SeqCst) + b_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_from_own_handler_is_reentrancy_error() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let outcome = Arc::new(Mutex::new(None));
        let finished = Arc::new(AtomicUsize::new(0));
        let (slot, done) = (Arc::clone(&outcome), Arc::clone(&finished));
        let handler = ChangeHandler::new(move |feature| {
            let result = feature.as_int().unwrap().set(100);
            *slot.lock().unwrap() = Some(result.map_err(|e| e.is_reentrancy_error()));
            done.fetch_add(1, Ordering::SeqCst);
        });

        let height = camera.get_feature_by_name("Height").unwrap();
        height.register_change_handler(&handler).unwrap();
        height.as_int().unwrap().set(200).unwrap();
        sim.flush();

        assert_eq!(*outcome.lock().unwrap(), Some(Err(true)));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(height.as_int().unwrap().get().unwrap(), 200);
    }

    #[test]
    fn test_set_of_other_feature_from_handler_is_allowed() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let width = camera.get_feature_by_name("Width").unwrap();
        let follower = Arc::clone(&width);
        let handler = ChangeHandler::new(move |feature| {
            let height = feature.as_int().unwrap().get().unwrap();
            let _ = follower.as_int().unwrap().set(height * 8);
        });

        let height = camera.get_feature_by_name("Height").unwrap();
        height.register_change_handler(&handler).unwrap();
        height.as_int().unwrap().set(100).unwrap();
        sim.flush();

        assert_eq!(width.as_int().unwrap().get().unwrap(), 800);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let bad = ChangeHandler::new(|_| panic!("handler failure"));
        let (good, good_calls) = counting_handler();
        let height = camera.get_feature_by_name("Height").unwrap();
        height.register_change_handler(&bad).unwrap();
        height.register_change_handler(&good).unwrap();

        height.as_int().unwrap().set(10).unwrap();
        height.as_int().unwrap().set(11).unwrap();
        sim.flush();
        assert_eq!(good_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_may_unregister_itself() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let me: Arc<Mutex<Option<ChangeHandler>>> = Arc::new(Mutex::new(None));
        let handler = {
            let (calls, me) = (Arc::clone(&calls), Arc::clone(&me));
            ChangeHandler::new(move |feature| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = me.lock().unwrap().take() {
                    feature.unregister_change_handler(&me).unwrap();
                }
            })
        };
        *me.lock().unwrap() = Some(handler.clone());

        let height = camera.get_feature_by_name("Height").unwrap();
        height.register_change_handler(&handler).unwrap();
        height.as_int().unwrap().set(10).unwrap();
        sim.flush();
        height.as_int().unwrap().set(11).unwrap();
        sim.flush();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(height.change_handler_count(), 0);
    }

    #[test]
    fn test_close_drops_handlers() {
        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let target = SimTarget::camera("DEV_1");

        let (handler, calls) = counting_handler();
        {
            let cam = camera.open().unwrap();
            let height = cam.get_feature_by_name("Height").unwrap();
            height.register_change_handler(&handler).unwrap();
            assert!(sim.is_subscribed(&target, "Height"));
        }

        let cam = camera.open().unwrap();
        let height = cam.get_feature_by_name("Height").unwrap();
        assert_eq!(height.change_handler_count(), 0);
        assert!(!sim.is_subscribed(&target, "Height"));

        height.as_int().unwrap().set(64).unwrap();
        sim.flush();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_on_closed_accessor_fails() {
        let (_sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();

        let height = {
            let cam = camera.open().unwrap();
            cam.get_feature_by_name("Height").unwrap()
        };

        let (handler, _) = counting_handler();
        let err = height.register_change_handler(&handler).unwrap_err();
        assert!(err.is_stale_handle());
        assert_eq!(height.change_handler_count(), 0);
    }

    #[test]
    fn test_concurrent_registration_on_two_features() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 200;

        let (sim, system) = setup();
        let _sys = system.open().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        let _cam = camera.open().unwrap();
        let target = SimTarget::camera("DEV_1");

        let height = camera.get_feature_by_name("Height").unwrap();
        let width = camera.get_feature_by_name("Width").unwrap();
        let registered = sim.call_count("feature_invalidation_register");
        let unregistered = sim.call_count("feature_invalidation_unregister");

        let keepers: Vec<(ChangeHandler, Arc<AtomicUsize>)> =
            (0..THREADS).map(|_| counting_handler()).collect();

        std::thread::scope(|scope| {
            for (keeper, _) in &keepers {
                let (height, width) = (&height, &width);
                scope.spawn(move || {
                    for round in 0..ROUNDS {
                        let feature = if round % 2 == 0 { height } else { width };
                        let (transient, _) = counting_handler();
                        feature.register_change_handler(&transient).unwrap();
                        feature.unregister_change_handler(&transient).unwrap();
                    }
                    height.register_change_handler(keeper).unwrap();
                    width.register_change_handler(keeper).unwrap();
                });
            }

            let (height, width) = (&height, &width);
            scope.spawn(move || {
                for round in 0..ROUNDS as i64 {
                    height.as_int().unwrap().set(round % 4096 + 1).unwrap();
                    width.as_int().unwrap().set((round % 512 + 1) * 8).unwrap();
                }
            });
        });
        sim.flush();

        assert_eq!(height.change_handler_count(), THREADS);
        assert_eq!(width.change_handler_count(), THREADS);
        assert!(sim.is_subscribed(&target, "Height"));
        assert!(sim.is_subscribed(&target, "Width"));

        // One native subscription per feature is left open.
        let opened = sim.call_count("feature_invalidation_register") - registered;
        let closed = sim.call_count("feature_invalidation_unregister") - unregistered;
        assert_eq!(opened - closed, 2);

        let before: Vec<usize> = keepers.iter().map(|(_, c)| c.load(Ordering::SeqCst)).collect();
        height.as_int().unwrap().set(77).unwrap();
        sim.flush();
        for ((_, calls), before) in keepers.iter().zip(before) {
            assert_eq!(calls.load(Ordering::SeqCst), before + 1);
        }

        height.unregister_all_change_handlers().unwrap();
        width.unregister_all_change_handlers().unwrap();
        assert!(!sim.is_subscribed(&target, "Height"));
        assert!(!sim.is_subscribed(&target, "Width"));
    }
}
