//! # Runtime Effects
//!
//! Effects that only make sense with an async runtime underneath. The core
//! never owns a runtime, so they are registered here on top of the
//! standard tables.

use reify_core::{EffectOutcome, Registries, Term};
use std::time::Duration;
use tracing::debug;

/// Upper bound for a single `SLEEP`, in milliseconds.
pub const MAX_SLEEP_MS: f64 = 3_600_000.0;

/// The standard registries plus the runtime effects.
#[must_use]
pub fn registries() -> Registries {
    let mut registries = Registries::standard();
    registries.effects.define(
        "SLEEP",
        "wait INPUT milliseconds, then return INPUT",
        "time",
        sleep,
    );
    registries
}

/// `SLEEP`: resolves to its input after that many milliseconds.
pub fn sleep(input: &Term) -> EffectOutcome {
    let Some(ms) = input
        .as_number()
        .filter(|ms| (0.0..=MAX_SLEEP_MS).contains(ms))
    else {
        return EffectOutcome::failure(format!(
            "SLEEP expects 0..={} milliseconds, got {}",
            MAX_SLEEP_MS, input
        ));
    };

    EffectOutcome::pending(async move {
        debug!(ms, "sleeping");
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        Ok(Term::number(ms))
    })
}
