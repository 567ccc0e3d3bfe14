//! Aerospace behaviors.

use crate::NodeError;
use bobcat_core::{
    utc_at, Behavior, Message, OptionDef, Options, PositionProvider, SimError, SimTime, Step,
    StepContext, Value,
};
use bobcat_orbit::czml;
use std::sync::Arc;
use tracing::debug;

/// Declared options of [`Propagator`].
pub const PROPAGATOR_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "time_processing", default: "0.0", help: "Reservation while the ephemeris is produced (s)" },
    OptionDef { name: "time_delay", default: "0.0", help: "Delay before the message leaves (s)" },
    OptionDef { name: "storage_key", default: "Propagator_Results", help: "Payload field receiving the samples" },
    OptionDef { name: "max_duration_s", default: "0", help: "Length of the sampled window (s); 0 disables sampling" },
    OptionDef { name: "time_step_s", default: "60", help: "Sample spacing (s)" },
    OptionDef { name: "max_viz_time_s", default: "0", help: "CZML window length (s); 0 disables visualization" },
];

/// Attaches a time-tagged ephemeris of the attached meta-node to each
/// message, and optionally writes a CZML scene for the sampled trajectory.
///
/// ```yaml
/// Ephemeris:
///     type: Propagator
///     time_processing: 25
///     max_duration_s: 60
///     time_step_s: 30
/// ```
///
/// The sample above reserves the node for 25 seconds per message, the way an
/// orbit analyst would block on producing an ephemeris file, and stores
/// inertial `(t, x, y, z)` samples covering the next 60 seconds under
/// `Propagator_Results`.
pub struct Propagator {
    time_processing: f64,
    time_delay: f64,
    storage_key: String,
    max_duration_s: f64,
    time_step_s: f64,
    max_viz_time_s: f64,
    emissions: u64,
}

impl Propagator {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(Propagator {
            time_processing: options.f64_or("time_processing", 0.0)?,
            time_delay: options.f64_or("time_delay", 0.0)?,
            storage_key: options.str_or("storage_key", "Propagator_Results"),
            max_duration_s: options.f64_or("max_duration_s", 0.0)?,
            time_step_s: options.f64_or("time_step_s", 60.0)?,
            max_viz_time_s: options.f64_or("max_viz_time_s", 0.0)?,
            emissions: 0,
        })
    }

    /// Inclusive sample times `[start, stop]` at the configured step.
    fn sample_times(&self, start: f64, stop: f64) -> Vec<f64> {
        let mut times = Vec::new();
        let mut index = 0u64;
        loop {
            let t = start + index as f64 * self.time_step_s;
            if t > stop + 1e-9 {
                break;
            }
            times.push(t);
            index += 1;
        }
        times
    }

    fn write_czml(
        &self,
        ctx: &mut StepContext<'_>,
        samples: &[(f64, [f64; 3])],
    ) -> Result<(), SimError> {
        let Some(czml_root) = ctx.czml_root else {
            return Ok(());
        };
        let viz_stop_secs = (ctx.now.as_secs_f64() + self.max_viz_time_s)
            .min(ctx.end_simtime.as_secs_f64());
        let viz_samples: Vec<(f64, [f64; 3])> = samples
            .iter()
            .copied()
            .filter(|(t, _)| *t <= viz_stop_secs + 1e-9)
            .collect();

        let track_id = ctx.fresh_message_id();
        let track = czml::Track {
            id: &track_id,
            name: ctx.node_name,
            start: ctx.now_utc(),
            end: utc_at(ctx.epoch, SimTime::from_secs(viz_stop_secs)),
            samples_km: &viz_samples,
        };
        let document = czml::satellite_document(
            ctx.epoch,
            utc_at(ctx.epoch, ctx.end_simtime),
            &track,
        );

        std::fs::create_dir_all(czml_root)?;
        let path = czml_root.join(format!("{}.czml", ctx.node_name));
        std::fs::write(path, serde_json::to_string_pretty(&document).unwrap_or_default())?;
        Ok(())
    }
}

/// Sample the provider at the given times, in order.
fn sample_window(
    provider: &Arc<dyn PositionProvider>,
    times: &[f64],
    epoch: hifitime::Epoch,
) -> Result<Vec<(f64, [f64; 3])>, SimError> {
    times
        .iter()
        .map(|t| {
            let (position, _velocity) = provider.coords(SimTime::from_secs(*t), epoch)?;
            Ok((*t, position))
        })
        .collect()
}

impl Behavior for Propagator {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(mut message) = input else {
            return Ok(Step::idle());
        };

        if self.max_duration_s > 0.0 {
            if self.time_step_s <= 0.0 {
                return Err(SimError::StepFailed {
                    simtime: ctx.now.as_secs_f64(),
                    node: ctx.node_name.to_string(),
                    message_id: message.id.clone(),
                    message: "time_step_s must be positive when max_duration_s is set".to_string(),
                });
            }
            let Some(provider) = ctx.position else {
                return Err(SimError::StepFailed {
                    simtime: ctx.now.as_secs_f64(),
                    node: ctx.node_name.to_string(),
                    message_id: message.id.clone(),
                    message: "propagator node has no attached meta node".to_string(),
                });
            };

            let start = ctx.now.as_secs_f64();
            let stop = (start + self.max_duration_s).min(ctx.end_simtime.as_secs_f64());
            let times = self.sample_times(start, stop);

            // Long windows are the expensive part; hand them to the worker
            // pool when one is configured. The engine still blocks on the
            // result, so simulated semantics are unchanged.
            let samples = match ctx.pool {
                Some(pool) => {
                    let provider = Arc::clone(provider);
                    let epoch = ctx.epoch;
                    let times = times.clone();
                    pool.run(move || sample_window(&provider, &times, epoch))?
                }
                None => sample_window(provider, &times, ctx.epoch)?,
            };

            debug!(
                node = ctx.node_name,
                id = %message.id,
                samples = samples.len(),
                "ephemeris attached"
            );

            let tuples = samples
                .iter()
                .map(|(t, p)| {
                    Value::List(vec![
                        Value::Float(*t),
                        Value::Float(p[0]),
                        Value::Float(p[1]),
                        Value::Float(p[2]),
                    ])
                })
                .collect();
            message.set(self.storage_key.clone(), Value::List(tuples));

            if self.max_viz_time_s > 0.0 {
                self.write_czml(ctx, &samples)?;
            }
        }

        self.emissions += 1;
        Ok(Step::emit(self.time_processing, self.time_delay, vec![message]))
    }

    fn state_summary(&self) -> String {
        format!("emissions={}", self.emissions)
    }
}
