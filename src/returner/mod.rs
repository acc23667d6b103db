//! The returner operation: stamp the return record with the filter tag,
//! wrap it in an envelope, and fire it at the host bus under the
//! `fire_master` routing label. One call, no state kept between calls.

use anyhow::Result;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::{Config, ReturnerConfig};
use crate::events::{Envelope, EventPublisher, FIRE_MASTER};

/// Forward a return record to the master over the host's event bus.
///
/// Loads the minion configuration from the host conf dir, then delegates
/// to [`returner_with_config`]. Configuration or publish failures
/// propagate unmodified.
pub fn returner(bus: &dyn EventPublisher, ret: Value) -> Result<()> {
    let config = Config::load()?;
    returner_with_config(bus, &config, ret)
}

/// Forward a return record using an already-loaded configuration.
///
/// The record's `tag` field is overwritten with the configured filter tag;
/// nothing else is touched unless `[returner] event_id` opts into stamping
/// a unique id for downstream storage.
pub fn returner_with_config(
    bus: &dyn EventPublisher,
    config: &Config,
    mut ret: Value,
) -> Result<()> {
    stamp(&mut ret, &config.returner);
    let package = Envelope::single(ret);
    debug!(id = %config.id, label = FIRE_MASTER, "firing return envelope");
    bus.fire_event(&package, FIRE_MASTER)
}

/// Forward several return records in one envelope, one publish call.
pub fn returner_batch(
    bus: &dyn EventPublisher,
    config: &Config,
    mut rets: Vec<Value>,
) -> Result<()> {
    for ret in &mut rets {
        stamp(ret, &config.returner);
    }
    let package = Envelope::batch(rets);
    debug!(
        id = %config.id,
        label = FIRE_MASTER,
        count = package.events.len(),
        "firing batch return envelope"
    );
    bus.fire_event(&package, FIRE_MASTER)
}

/// A tag can only be attached to a map-shaped record; anything else is
/// forwarded untouched.
fn stamp(ret: &mut Value, returner: &ReturnerConfig) {
    match ret.as_object_mut() {
        Some(map) => {
            map.insert("tag".to_string(), Value::String(returner.tag.clone()));
            if returner.event_id {
                map.entry("event_id")
                    .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            }
        }
        None => debug!("return record is not a map; forwarding untagged"),
    }
}

// ── Tests ───────────────────────────────────────────────────────
