//! Message sources.
//!
//! Sources have no upstream: the runtime bootstraps each one with
//! `step(None)` at scenario start and re-invokes it at every ready time
//! while `active()` holds.

use crate::{size_key, NodeError};
use bobcat_core::{Behavior, Message, Options, SimError, Step, StepContext, Value};
use rand::Rng;
use tracing::warn;

/// Declared options of [`RandomDataSource`].
pub const RANDOM_DATA_SOURCE_OPTIONS: &[bobcat_core::OptionDef] = &[
    bobcat_core::OptionDef { name: "random_size_min", default: "10", help: "Minimum generated message size" },
    bobcat_core::OptionDef { name: "random_size_max", default: "100", help: "Maximum generated message size" },
    bobcat_core::OptionDef { name: "random_delay_min", default: "1.0", help: "Minimum cooldown between messages (s)" },
    bobcat_core::OptionDef { name: "random_delay_max", default: "10.0", help: "Maximum cooldown between messages (s)" },
    bobcat_core::OptionDef { name: "single_pulse", default: "False", help: "Emit one message and go inactive" },
    bobcat_core::OptionDef { name: "start_node_active", default: "True", help: "Whether the source starts active" },
];

/// A message source that sends randomized messages.
///
/// The first message goes out immediately at bootstrap; each following
/// message is preceded by a cooldown drawn uniformly from the configured
/// delay range.
pub struct RandomDataSource {
    size_min: i64,
    size_max: i64,
    delay_min: f64,
    delay_max: f64,
    single_pulse: bool,
    active: bool,
    size_key: String,
    first_done: bool,
    emitted: u64,
}

impl RandomDataSource {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(RandomDataSource {
            size_min: options.i64_or("random_size_min", 10)?,
            size_max: options.i64_or("random_size_max", 100)?,
            delay_min: options.f64_or("random_delay_min", 1.0)?,
            delay_max: options.f64_or("random_delay_max", 10.0)?,
            single_pulse: options.bool_or("single_pulse", false)?,
            active: options.bool_or("start_node_active", true)?,
            size_key: size_key(options),
            first_done: false,
            emitted: 0,
        })
    }

    fn make_message(&mut self, ctx: &mut StepContext<'_>) -> Message {
        let size = if self.size_max > self.size_min {
            ctx.rng.gen_range(self.size_min..=self.size_max)
        } else {
            self.size_min
        };
        let mut message = ctx.new_message();
        message.set(self.size_key.clone(), Value::Int(size));
        self.emitted += 1;
        message
    }

    fn cooldown(&self, ctx: &mut StepContext<'_>) -> f64 {
        if self.delay_max > self.delay_min {
            ctx.rng.gen_range(self.delay_min..=self.delay_max)
        } else {
            self.delay_min
        }
    }
}

impl Behavior for RandomDataSource {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        // A source with an upstream consumes and drops; it only generates.
        if input.is_some() {
            return Ok(Step::idle());
        }
        if !self.active {
            return Ok(Step::idle());
        }

        let message = self.make_message(ctx);
        if self.single_pulse {
            self.active = false;
        }

        if !self.first_done {
            self.first_done = true;
            Ok(Step::emit(0.0, 0.0, vec![message]))
        } else {
            let cooldown = self.cooldown(ctx);
            Ok(Step::emit(cooldown, 0.0, vec![message]))
        }
    }

    fn is_source(&self) -> bool {
        true
    }

    fn active(&self) -> bool {
        self.active
    }

    fn state_summary(&self) -> String {
        format!("active={} emitted={}", self.active, self.emitted)
    }
}

/// Declared options of [`PositionReport`].
pub const POSITION_REPORT_OPTIONS: &[bobcat_core::OptionDef] = &[bobcat_core::OptionDef {
    name: "frequency",
    default: "10",
    help: "Seconds between position reports",
}];

/// A message source that sends messages with the current location of its
/// attached meta-node.
pub struct PositionReport {
    frequency: f64,
    size_key: String,
    warned_no_meta: bool,
    emitted: u64,
}

impl PositionReport {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(PositionReport {
            frequency: options.f64_or("frequency", 10.0)?,
            size_key: size_key(options),
            warned_no_meta: false,
            emitted: 0,
        })
    }
}

impl Behavior for PositionReport {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        if input.is_some() {
            return Ok(Step::idle());
        }

        let Some(position) = ctx.position else {
            if !self.warned_no_meta {
                warn!(node = ctx.node_name, "position report without a meta node");
                self.warned_no_meta = true;
            }
            return Ok(Step::emit(self.frequency, 0.0, vec![]));
        };

        let fix = position.location(ctx.now, ctx.epoch)?;
        let mut message = ctx.new_message();
        message.set(self.size_key.clone(), Value::Int(0));
        message.set(
            "position",
            Value::List(vec![
                Value::Float(fix.lat_deg),
                Value::Float(fix.lon_deg),
                Value::Float(fix.alt_km),
            ]),
        );
        message.set("velocity_km_s", Value::Float(fix.velocity_km_s));
        self.emitted += 1;

        Ok(Step::emit(self.frequency, 0.0, vec![message]))
    }

    fn is_source(&self) -> bool {
        true
    }

    fn active(&self) -> bool {
        true
    }

    fn state_summary(&self) -> String {
        format!("emitted={}", self.emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Ctx;
    use bobcat_core::SimTime;

    #[test]
    fn test_random_source_first_emission_is_immediate() {
        let mut ctx = Ctx::new();
        let mut source = RandomDataSource::from_options(&Options::default()).unwrap();

        let step = source.step(None, &mut ctx.step("Source")).unwrap();
        assert_eq!(step.setup_delay, SimTime::ZERO);
        assert_eq!(step.processing_delay, SimTime::ZERO);
        assert_eq!(step.outputs.len(), 1);
        let size = step.outputs[0].size(bobcat_core::DEFAULT_SIZE_KEY);
        assert!((10.0..=100.0).contains(&size));
        assert!(source.active());
    }

    #[test]
    fn test_random_source_cooldown_in_range() {
        let mut ctx = Ctx::new();
        let mut source = RandomDataSource::from_options(&Options::default()).unwrap();
        source.step(None, &mut ctx.step("Source")).unwrap();

        let step = source.step(None, &mut ctx.step("Source")).unwrap();
        let cooldown = step.setup_delay.as_secs_f64();
        assert!((1.0..=10.0).contains(&cooldown), "cooldown {cooldown}");
    }

    #[test]
    fn test_single_pulse_goes_inactive() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("single_pulse".to_string(), Value::Str("True".into()));
        let mut ctx = Ctx::new();
        let mut source = RandomDataSource::from_options(&Options(map)).unwrap();

        let step = source.step(None, &mut ctx.step("Source")).unwrap();
        assert_eq!(step.outputs.len(), 1);
        assert!(!source.active());
    }

    #[test]
    fn test_position_report_without_meta_emits_nothing() {
        let mut ctx = Ctx::new();
        let mut report = PositionReport::from_options(&Options::default()).unwrap();
        let step = report.step(None, &mut ctx.step("Report")).unwrap();
        assert!(step.outputs.is_empty());
        assert_eq!(step.setup_delay, SimTime::from_secs(10.0));
    }

    #[test]
    fn test_position_report_carries_location() {
        let mut ctx = Ctx::new();
        ctx.position = Some(std::sync::Arc::new(bobcat_orbit::PositionModel::geopoint(
            10.0, 20.0, 0.5,
        )));
        let mut report = PositionReport::from_options(&Options::default()).unwrap();

        let step = report.step(None, &mut ctx.step("Report")).unwrap();
        assert_eq!(step.outputs.len(), 1);
        let position = step.outputs[0].get("position").unwrap().as_list().unwrap();
        assert_eq!(position[0], Value::Float(10.0));
        assert_eq!(position[1], Value::Float(20.0));
    }
}
