//! Property-based tests for numeric and string feature validation.
//!
//! Every accepted write must land on the device unchanged, and every
//! rejected write must leave the device value untouched.
//!
//! Run with: cargo test --test numeric_props

use proptest::prelude::*;
use std::sync::Arc;
use vmbcam::prelude::*;
use vmbcam::testing::{camera_info, SimFeature, SimTarget, SimValue, SimulatedApi};

struct Rig {
    sim: Arc<SimulatedApi>,
    system: Arc<System>,
    camera: Arc<Camera>,
}

impl Rig {
    fn new(features: Vec<SimFeature>) -> Self {
        let sim = Arc::new(SimulatedApi::new());
        sim.add_camera(camera_info("DEV_1", "IF_1"), features);
        let system = System::new(sim.clone());
        system.enter().unwrap();
        let camera = system.get_camera_by_id("DEV_1").unwrap();
        camera.enter().unwrap();
        Self {
            sim,
            system,
            camera,
        }
    }

    fn feature(&self, name: &str) -> Arc<Feature> {
        self.camera.get_feature_by_name(name).unwrap()
    }

    fn device_value(&self, name: &str) -> Option<SimValue> {
        self.sim.value(&SimTarget::camera("DEV_1"), name)
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        let _ = self.camera.exit();
        let _ = self.system.exit();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// INVARIANT: aligned values inside the range are accepted as-is
    #[test]
    fn int_accepts_aligned_values_in_range(
        min in -1000i64..1000,
        span in 1i64..10_000,
        inc in 1i64..16,
        pick in 0i64..10_000,
    ) {
        let max = min + span;
        let steps = span / inc;
        let value = min + (pick % (steps + 1)) * inc;

        let rig = Rig::new(vec![SimFeature::int("Offset", min, (min, max), inc)]);
        let feature = rig.feature("Offset");
        let offset = feature.as_int().unwrap();

        prop_assert!(offset.set(value).is_ok());
        prop_assert_eq!(offset.get().unwrap(), value);
    }

    /// INVARIANT: out-of-range writes are value errors and change nothing
    #[test]
    fn int_rejects_out_of_range(
        min in -1000i64..1000,
        span in 0i64..1000,
        beyond in 1i64..1000,
        above in any::<bool>(),
    ) {
        let max = min + span;
        let value = if above { max + beyond } else { min - beyond };

        let rig = Rig::new(vec![SimFeature::int("Offset", min, (min, max), 1)]);
        let feature = rig.feature("Offset");
        let err = feature.as_int().unwrap().set(value).unwrap_err();

        prop_assert!(err.is_value_error());
        let expected = format!("is not within [{}, {}]", min, max);
        prop_assert!(err.to_string().contains(&expected));
        prop_assert_eq!(
            rig.device_value("Offset"),
            Some(SimValue::Int { value: min, min, max, increment: 1 })
        );
    }

    /// INVARIANT: misaligned values inside the range are value errors
    #[test]
    fn int_rejects_misaligned(
        min in 0i64..100,
        inc in 2i64..32,
        steps in 1i64..100,
        offset in 1i64..32,
    ) {
        let offset = offset % inc;
        prop_assume!(offset != 0);
        let max = min + inc * (steps + 1);
        let value = min + inc * steps + offset;

        let rig = Rig::new(vec![SimFeature::int("Width", min, (min, max), inc)]);
        let feature = rig.feature("Width");
        let err = feature.as_int().unwrap().set(value).unwrap_err();

        prop_assert!(err.is_value_error());
        prop_assert!(err.to_string().contains("is not a multiple of"));
    }

    /// INVARIANT: float writes succeed exactly when inside the closed range
    #[test]
    fn float_range_is_inclusive(
        value in -100.0f64..100.0,
    ) {
        let rig = Rig::new(vec![SimFeature::float("Gain", 0.0, (-10.0, 10.0), None)]);
        let feature = rig.feature("Gain");
        let gain = feature.as_float().unwrap();

        let result = gain.set(value);
        if (-10.0..=10.0).contains(&value) {
            prop_assert!(result.is_ok());
            prop_assert_eq!(gain.get().unwrap(), value);
        } else {
            prop_assert!(result.unwrap_err().is_value_error());
            prop_assert_eq!(gain.get().unwrap(), 0.0);
        }
    }

    /// INVARIANT: strings fit when their byte length leaves room for the NUL
    #[test]
    fn string_respects_max_length(
        value in "[a-zA-Z0-9 _-]{0,40}",
    ) {
        let rig = Rig::new(vec![SimFeature::string("DeviceUserID", "", 21)]);
        let feature = rig.feature("DeviceUserID");
        let user_id = feature.as_string().unwrap();

        let result = user_id.set(&value);
        if value.len() < 21 {
            prop_assert!(result.is_ok());
            prop_assert_eq!(user_id.get().unwrap(), value);
        } else {
            prop_assert!(result.unwrap_err().is_value_error());
            prop_assert_eq!(user_id.get().unwrap(), "");
        }
    }

    /// INVARIANT: raw buffers are stored byte for byte
    #[test]
    fn raw_preserves_bytes(
        data in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let rig = Rig::new(vec![SimFeature::raw("UserData", &[])]);
        let feature = rig.feature("UserData");
        let raw = feature.as_raw().unwrap();

        raw.set(&data).unwrap();
        prop_assert_eq!(raw.length().unwrap() as usize, data.len());
        prop_assert_eq!(raw.get().unwrap(), data);
    }

    /// INVARIANT: an enum entry is reachable by its value and by its name
    #[test]
    fn enum_set_by_value_and_name_agree(
        index in 0usize..4,
    ) {
        let entries = [("Off", 0i64), ("Once", 1), ("Continuous", 2), ("Auto", 7)];
        let rig = Rig::new(vec![SimFeature::enumeration("ExposureAuto", &entries, "Off")]);
        let feature = rig.feature("ExposureAuto");
        let exposure_auto = feature.as_enum().unwrap();
        let (name, value) = entries[index];

        exposure_auto.set(value).unwrap();
        prop_assert_eq!(exposure_auto.get().unwrap().name(), name);

        exposure_auto.set("Off").unwrap();
        exposure_auto.set(name).unwrap();
        prop_assert_eq!(exposure_auto.get().unwrap().value(), value);
    }
}
