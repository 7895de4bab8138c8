//! Runtime invariant checks with contract test support.
//!
//! Lifecycle code states its invariants with [`assert_invariant!`]. Every
//! check is recorded per thread so a test can assert afterwards that the
//! invariants it cares about were actually exercised.
//!
//! ```rust,ignore
//! use vmbcam::invariants::*;
//!
//! assert_invariant!(
//!     count > 0 || features.is_empty(),
//!     "Closed context exposes no features",
//!     "container"
//! );
//!
//! #[test]
//! fn contract_context_lifecycle() {
//!     // ... drive enter/exit ...
//!     contract_test("context lifecycle", &["Closed context exposes no features"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

thread_local! {
    static INVARIANT_LOG: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and record that it was checked.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariants::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariants::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().insert(message.to_string());
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("Invariant violated [{}]: {}", ctx, message);
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Invariants enforced by every feature container.
pub const CLOSED_HAS_NO_FEATURES: &str = "Closed context exposes no features";
pub const OPEN_HAS_HANDLE: &str = "Open context holds a valid native handle";
pub const CLOSED_HAS_NO_HANDLE: &str = "Closed context holds no native handle";

/// Check that specific invariants were verified on this thread.
///
/// # Panics
/// Panics if any required invariant was not checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let log = INVARIANT_LOG.with(|log| log.borrow().clone());

    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| !log.contains(*invariant))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().clear();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_invariants_satisfy_contract() {
        clear_invariant_log();
        assert_invariant!(true, "first");
        assert_invariant!(1 + 1 == 2, "second", "tests");
        contract_test("both checked", &["first", "second"]);
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_unchecked_invariant_fails_contract() {
        clear_invariant_log();
        contract_test("nothing checked", &["never asserted"]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION [tests]")]
    fn test_violation_panics() {
        assert_invariant!(false, "must hold", "tests");
    }
}
