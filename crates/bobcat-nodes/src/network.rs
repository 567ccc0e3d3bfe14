//! Network delay and transform behaviors.

use crate::{size_key, NodeError};
use bobcat_core::{
    parse_epoch, Behavior, Message, OptionDef, Options, SimError, Step, StepContext, Value,
};
use hifitime::Epoch;
use tracing::{debug, warn};

/// Declared options of [`AddKeyValue`].
pub const ADD_KEY_VALUE_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "key", default: "~", help: "Payload field to set" },
    OptionDef { name: "value", default: "~", help: "Value to store under the key" },
    OptionDef { name: "time_delay", default: "0.0", help: "Delay before the message leaves (s)" },
];

/// Adds a key/value pair to each message payload for use later in the
/// simulation.
pub struct AddKeyValue {
    key: Option<String>,
    value: Option<Value>,
    time_delay: f64,
}

impl AddKeyValue {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(AddKeyValue {
            key: options.get("key").map(|v| v.render()),
            value: options.get("value").cloned(),
            time_delay: options.f64_or("time_delay", 0.0)?,
        })
    }
}

impl Behavior for AddKeyValue {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(mut message) = input else {
            return Ok(Step::idle());
        };
        match (&self.key, &self.value) {
            (Some(key), Some(value)) => {
                debug!(node = ctx.node_name, id = %message.id, key = %key, "adding key-value pair");
                message.set(key.clone(), value.clone());
            }
            _ => {
                warn!(node = ctx.node_name, id = %message.id, "key or value unset, passing through");
            }
        }
        Ok(Step::emit(0.0, self.time_delay, vec![message]))
    }
}

/// Declared options of [`DelayTime`].
pub const DELAY_TIME_OPTIONS: &[OptionDef] = &[OptionDef {
    name: "time_delay",
    default: "0.01",
    help: "Fixed delay applied to each message (s)",
}];

/// Delays each message by a fixed time while the node is reserved.
pub struct DelayTime {
    time_delay: f64,
}

impl DelayTime {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(DelayTime {
            time_delay: options.f64_or("time_delay", 0.01)?,
        })
    }
}

impl Behavior for DelayTime {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(message) = input else {
            return Ok(Step::idle());
        };
        debug!(
            node = ctx.node_name,
            id = %message.id,
            delay = self.time_delay,
            "message delayed"
        );
        Ok(Step::emit(0.0, self.time_delay, vec![message]))
    }
}

/// Declared options of [`DelaySize`].
pub const DELAY_SIZE_OPTIONS: &[OptionDef] = &[OptionDef {
    name: "rate_per_mbit",
    default: "100.0",
    help: "Transmission rate used to turn size into delay",
}];

/// Delays each message proportionally to its size.
pub struct DelaySize {
    rate_per_mbit: f64,
    size_key: String,
}

impl DelaySize {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(DelaySize {
            rate_per_mbit: options.f64_or("rate_per_mbit", 100.0)?,
            size_key: size_key(options),
        })
    }
}

impl Behavior for DelaySize {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(message) = input else {
            return Ok(Step::idle());
        };
        let delay = if self.rate_per_mbit > 0.0 {
            message.size(&self.size_key) / self.rate_per_mbit
        } else {
            warn!(node = ctx.node_name, "non-positive rate_per_mbit, no delay applied");
            0.0
        };
        Ok(Step::emit(0.0, delay, vec![message]))
    }
}

/// Declared options of [`KeyDelayTime`].
pub const KEY_DELAY_TIME_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "delay_key", default: "key", help: "Payload field naming the release time" },
    OptionDef { name: "convert_unix_time", default: "False", help: "Treat the field as unix epoch seconds" },
    OptionDef { name: "convert_iso_datetime", default: "False", help: "Treat the field as an ISO timestamp" },
];

/// Holds each message until the simtime named by one of its fields.
///
/// The field is read as absolute simtime seconds by default, or converted
/// from unix epoch seconds / an ISO timestamp through the scenario epoch.
pub struct KeyDelayTime {
    delay_key: String,
    convert_unix_time: bool,
    convert_iso_datetime: bool,
}

impl KeyDelayTime {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(KeyDelayTime {
            delay_key: options.str_or("delay_key", "key"),
            convert_unix_time: options.bool_or("convert_unix_time", false)?,
            convert_iso_datetime: options.bool_or("convert_iso_datetime", false)?,
        })
    }

    fn release_delay(&self, message: &Message, ctx: &StepContext<'_>) -> Option<f64> {
        let value = message.get(&self.delay_key)?;
        let now = ctx.now.as_secs_f64();
        if self.convert_unix_time {
            let unix = value.as_f64()?;
            let target = Epoch::from_unix_seconds(unix);
            Some((target - ctx.epoch).to_seconds() - now)
        } else if self.convert_iso_datetime {
            let target = parse_epoch(value.as_str()?).ok()?;
            Some((target - ctx.epoch).to_seconds() - now)
        } else {
            Some(value.as_f64()? - now)
        }
    }
}

impl Behavior for KeyDelayTime {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(message) = input else {
            return Ok(Step::idle());
        };
        let delay = match self.release_delay(&message, ctx) {
            Some(delay) if delay < 0.0 => {
                warn!(
                    node = ctx.node_name,
                    id = %message.id,
                    delay,
                    "calculated delay is negative, releasing immediately"
                );
                0.0
            }
            Some(delay) => delay,
            None => {
                warn!(
                    node = ctx.node_name,
                    id = %message.id,
                    key = %self.delay_key,
                    "release time missing or unparseable, releasing immediately"
                );
                0.0
            }
        };
        Ok(Step::emit(0.0, delay, vec![message]))
    }
}

/// Declared options of [`MathisDelay`].
pub const MATHIS_DELAY_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "mss", default: "1460.0", help: "Maximum segment size in bytes" },
    OptionDef { name: "rtt", default: "0.1", help: "Round trip time in seconds" },
    OptionDef { name: "packet_loss", default: "0.001", help: "Packet loss probability" },
    OptionDef { name: "c_constant", default: "0.93", help: "Mathis constant (TCP Reno)" },
    OptionDef { name: "output_keys", default: "[throughput, throughput_mbps, processing_time, readable_delay]", help: "Computed fields to attach" },
    OptionDef { name: "save_network_params", default: "False", help: "Echo the network parameters into the message" },
];

/// Delays each message by the TCP throughput limit from the Mathis
/// equation, `throughput = MSS × C / (RTT × √loss)`.
///
/// Parameters can be overridden per message by payload fields of the same
/// name, so upstream nodes can model changing channel conditions.
pub struct MathisDelay {
    mss: f64,
    rtt: f64,
    packet_loss: f64,
    c_constant: f64,
    output_keys: Vec<String>,
    save_network_params: bool,
    size_key: String,
}

impl MathisDelay {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        let output_keys = match options.list("output_keys") {
            Some(items) => items.iter().map(Value::render).collect(),
            None => vec![
                "throughput".to_string(),
                "throughput_mbps".to_string(),
                "processing_time".to_string(),
                "readable_delay".to_string(),
            ],
        };
        Ok(MathisDelay {
            mss: options.f64_or("mss", 1460.0)?,
            rtt: options.f64_or("rtt", 0.1)?,
            packet_loss: options.f64_or("packet_loss", 0.001)?,
            c_constant: options.f64_or("c_constant", 0.93)?,
            output_keys,
            save_network_params: options.bool_or("save_network_params", false)?,
            size_key: size_key(options),
        })
    }

    fn param(&self, message: &Message, name: &str, configured: f64) -> f64 {
        message.get(name).and_then(Value::as_f64).unwrap_or(configured)
    }
}

/// Maximum TCP throughput from the Mathis equation. Vanishing loss means an
/// unconstrained link.
pub fn mathis_throughput(mss: f64, rtt: f64, packet_loss: f64, c: f64) -> f64 {
    if packet_loss < 1e-10 {
        f64::INFINITY
    } else {
        (mss * c) / (rtt * packet_loss.sqrt())
    }
}

fn format_readable_time(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.2} ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{seconds:.2} seconds")
    } else if seconds < 3600.0 {
        format!("{:.2} minutes", seconds / 60.0)
    } else {
        format!("{:.2} hours", seconds / 3600.0)
    }
}

impl Behavior for MathisDelay {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(mut message) = input else {
            return Ok(Step::idle());
        };

        let mss = self.param(&message, "mss", self.mss);
        let rtt = self.param(&message, "rtt", self.rtt);
        let packet_loss = self.param(&message, "packet_loss", self.packet_loss);
        let c_constant = self.param(&message, "c_constant", self.c_constant);

        let throughput = mathis_throughput(mss, rtt, packet_loss, c_constant);
        let delay = if throughput.is_finite() && throughput > 0.0 {
            message.size(&self.size_key) / throughput
        } else {
            0.0
        };

        for key in &self.output_keys {
            match key.as_str() {
                "throughput" => message.set("throughput", Value::Float(throughput)),
                "throughput_mbps" => {
                    message.set("throughput_mbps", Value::Float(throughput * 8.0 / 1_000_000.0))
                }
                "processing_time" => message.set("processing_time", Value::Float(delay)),
                "readable_delay" => {
                    message.set("readable_delay", Value::Str(format_readable_time(delay)))
                }
                other => warn!(node = ctx.node_name, key = other, "unknown mathis output key"),
            }
        }
        if self.save_network_params {
            for (name, value) in [
                ("mss", mss),
                ("rtt", rtt),
                ("packet_loss", packet_loss),
                ("c_constant", c_constant),
            ] {
                if message.get(name).is_none() {
                    message.set(name, Value::Float(value));
                }
            }
        }

        debug!(
            node = ctx.node_name,
            id = %message.id,
            throughput,
            delay,
            "mathis delay computed"
        );
        Ok(Step::emit(0.0, delay, vec![message]))
    }
}

/// Declared options of [`Maximizer`] and [`Minimizer`].
pub const EXTREMIZER_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "key", default: "KEY", help: "List-valued payload field to reduce" },
    OptionDef { name: "time_delay", default: "0.0", help: "Delay before the message leaves (s)" },
];

enum Extreme {
    Max,
    Min,
}

struct Extremizer {
    key: String,
    time_delay: f64,
    pick: Extreme,
}

impl Extremizer {
    fn from_options(options: &Options, pick: Extreme) -> Result<Self, NodeError> {
        Ok(Extremizer {
            key: options.str_or("key", "KEY"),
            time_delay: options.f64_or("time_delay", 0.0)?,
            pick,
        })
    }

    fn reduce(&self, items: &[Value]) -> Option<Value> {
        let mut best: Option<(f64, bool)> = None;
        for item in items {
            let numeric = item.as_f64()?;
            let is_int = matches!(item, Value::Int(_));
            best = Some(match best {
                None => (numeric, is_int),
                Some((current, current_int)) => {
                    let take = match self.pick {
                        Extreme::Max => numeric > current,
                        Extreme::Min => numeric < current,
                    };
                    if take {
                        (numeric, is_int)
                    } else {
                        (current, current_int)
                    }
                }
            });
        }
        best.map(|(value, is_int)| {
            if is_int {
                Value::Int(value as i64)
            } else {
                Value::Float(value)
            }
        })
    }

    fn step_impl(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(mut message) = input else {
            return Ok(Step::idle());
        };
        let reduced = message
            .get(&self.key)
            .and_then(Value::as_list)
            .and_then(|items| self.reduce(items));
        let Some(value) = reduced else {
            return Err(SimError::StepFailed {
                simtime: ctx.now.as_secs_f64(),
                node: ctx.node_name.to_string(),
                message_id: message.id.clone(),
                message: format!("field '{}' is not a non-empty numeric list", self.key),
            });
        };
        debug!(node = ctx.node_name, id = %message.id, value = %value.render(), "list reduced");
        message.set(self.key.clone(), value);
        Ok(Step::emit(0.0, self.time_delay, vec![message]))
    }
}

/// Replaces a list-valued field with its maximum.
pub struct Maximizer(Extremizer);

impl Maximizer {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(Maximizer(Extremizer::from_options(options, Extreme::Max)?))
    }
}

impl Behavior for Maximizer {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        self.0.step_impl(input, ctx)
    }
}

/// Replaces a list-valued field with its minimum.
pub struct Minimizer(Extremizer);

impl Minimizer {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(Minimizer(Extremizer::from_options(options, Extreme::Min)?))
    }
}

impl Behavior for Minimizer {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        self.0.step_impl(input, ctx)
    }
}

/// Declared options of [`Combiner`].
pub const COMBINER_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "num_messages", default: "1", help: "Messages to collect before forwarding" },
    OptionDef { name: "key", default: "size_mbits", help: "Payload field whose values are collected" },
    OptionDef { name: "time_delay", default: "0.0", help: "Delay before the combined message leaves (s)" },
    OptionDef { name: "processing_delay", default: "0.0", help: "Reservation while combining (s)" },
];

/// Collects a keyed value from N messages, then forwards the Nth message
/// carrying the combined list. Prior messages are dropped.
pub struct Combiner {
    num_messages: i64,
    key: String,
    time_delay: f64,
    processing_delay: f64,
    collected: Vec<Value>,
    seen: i64,
}

impl Combiner {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        let key = match options.get("key") {
            Some(v) => v.render(),
            None => size_key(options),
        };
        Ok(Combiner {
            num_messages: options.i64_or("num_messages", 1)?,
            key,
            time_delay: options.f64_or("time_delay", 0.0)?,
            processing_delay: options.f64_or("processing_delay", 0.0)?,
            collected: Vec::new(),
            seen: 0,
        })
    }
}

impl Behavior for Combiner {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(mut message) = input else {
            return Ok(Step::idle());
        };
        self.seen += 1;

        match message.get(&self.key) {
            Some(Value::List(items)) => self.collected.extend(items.iter().cloned()),
            Some(value) => self.collected.push(value.clone()),
            None => {
                warn!(
                    node = ctx.node_name,
                    id = %message.id,
                    key = %self.key,
                    "key not found in message, not added to list"
                );
            }
        }

        if self.seen >= self.num_messages {
            debug!(node = ctx.node_name, id = %message.id, "threshold met, forwarding combined message");
            message.set(self.key.clone(), Value::List(std::mem::take(&mut self.collected)));
            self.seen = 0;
            Ok(Step::emit(self.time_delay, self.processing_delay, vec![message]))
        } else {
            Ok(Step::idle())
        }
    }

    fn state_summary(&self) -> String {
        format!("collected={} seen={}", self.collected.len(), self.seen)
    }
}

/// Declared options of [`Partitioner`].
pub const PARTITIONER_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "key", default: "KEY", help: "List-valued payload field to split" },
    OptionDef { name: "time_delay", default: "0.0", help: "Delay before the split messages leave (s)" },
];

/// Splits a list-valued field into one output message per element, the
/// structural inverse of [`Combiner`]. Each copy carries a single value
/// under the key; an empty list consumes the message.
pub struct Partitioner {
    key: String,
    time_delay: f64,
}

impl Partitioner {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(Partitioner {
            key: options.str_or("key", "KEY"),
            time_delay: options.f64_or("time_delay", 0.0)?,
        })
    }
}

impl Behavior for Partitioner {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(message) = input else {
            return Ok(Step::idle());
        };
        let Some(items) = message.get(&self.key).and_then(Value::as_list).map(<[Value]>::to_vec)
        else {
            return Err(SimError::StepFailed {
                simtime: ctx.now.as_secs_f64(),
                node: ctx.node_name.to_string(),
                message_id: message.id.clone(),
                message: format!("field '{}' is not a list", self.key),
            });
        };

        let outputs: Vec<Message> = items
            .into_iter()
            .map(|value| {
                let mut copy = message.clone();
                copy.set(self.key.clone(), value);
                copy
            })
            .collect();
        debug!(
            node = ctx.node_name,
            id = %message.id,
            parts = outputs.len(),
            "list split into messages"
        );
        Ok(Step::emit(0.0, self.time_delay, outputs))
    }
}

/// Declared options of [`Sink`].
pub const SINK_OPTIONS: &[OptionDef] = &[OptionDef {
    name: "log_payload",
    default: "False",
    help: "Log the full payload of each received message",
}];

/// Consumes messages and counts receipts.
pub struct Sink {
    log_payload: bool,
    receipts: u64,
}

impl Sink {
    /// Build from resolved options.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        Ok(Sink {
            log_payload: options.bool_or("log_payload", false)?,
            receipts: 0,
        })
    }

    /// Messages received so far.
    pub fn receipts(&self) -> u64 {
        self.receipts
    }
}

impl Behavior for Sink {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(message) = input else {
            return Ok(Step::idle());
        };
        self.receipts += 1;
        if self.log_payload {
            let payload = serde_json::to_string(&message.payload).unwrap_or_default();
            debug!(node = ctx.node_name, id = %message.id, payload = %payload, "message consumed");
        }
        Ok(Step::idle())
    }

    fn state_summary(&self) -> String {
        format!("receipts={}", self.receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Ctx;
    use bobcat_core::SimTime;
    use std::collections::BTreeMap;

    fn options(pairs: &[(&str, Value)]) -> Options {
        Options(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn message_with(fields: &[(&str, Value)]) -> Message {
        let mut message = Message::new("m0".to_string(), SimTime::ZERO);
        for (key, value) in fields {
            message.set(*key, value.clone());
        }
        message
    }

    #[test]
    fn test_add_key_value() {
        let mut ctx = Ctx::new();
        let mut node = AddKeyValue::from_options(&options(&[
            ("key", Value::Str("collected".into())),
            ("value", Value::Int(200)),
        ]))
        .unwrap();

        let step = node.step(Some(message_with(&[])), &mut ctx.step("Tagger")).unwrap();
        assert_eq!(step.outputs[0].get("collected"), Some(&Value::Int(200)));
    }

    #[test]
    fn test_add_key_value_without_key_passes_through() {
        let mut ctx = Ctx::new();
        let mut node = AddKeyValue::from_options(&options(&[("value", Value::Int(1))])).unwrap();
        let step = node.step(Some(message_with(&[])), &mut ctx.step("Tagger")).unwrap();
        assert_eq!(step.outputs.len(), 1);
        assert!(step.outputs[0].get("value").is_none());
    }

    #[test]
    fn test_delay_time_reserves_for_the_delay() {
        let mut ctx = Ctx::new();
        let mut node = DelayTime::from_options(&options(&[("time_delay", Value::Float(5.0))])).unwrap();
        let step = node.step(Some(message_with(&[])), &mut ctx.step("Delay")).unwrap();
        assert_eq!(step.setup_delay, SimTime::ZERO);
        assert_eq!(step.processing_delay, SimTime::from_secs(5.0));
        assert_eq!(step.outputs.len(), 1);
    }

    #[test]
    fn test_delay_size_divides_by_rate() {
        let mut ctx = Ctx::new();
        let mut node = DelaySize::from_options(&options(&[("rate_per_mbit", Value::Float(50.0))])).unwrap();
        let message = message_with(&[("size_mbits", Value::Int(100))]);
        let step = node.step(Some(message), &mut ctx.step("Downlink")).unwrap();
        assert_eq!(step.processing_delay, SimTime::from_secs(2.0));
    }

    #[test]
    fn test_key_delay_absolute_simtime() {
        let mut ctx = Ctx::new();
        ctx.now = SimTime::from_secs(10.0);
        let mut node =
            KeyDelayTime::from_options(&options(&[("delay_key", Value::Str("release_at".into()))])).unwrap();
        let message = message_with(&[("release_at", Value::Float(25.0))]);
        let step = node.step(Some(message), &mut ctx.step("Hold")).unwrap();
        assert_eq!(step.processing_delay, SimTime::from_secs(15.0));
    }

    #[test]
    fn test_key_delay_negative_clamps() {
        let mut ctx = Ctx::new();
        ctx.now = SimTime::from_secs(50.0);
        let mut node =
            KeyDelayTime::from_options(&options(&[("delay_key", Value::Str("release_at".into()))])).unwrap();
        let message = message_with(&[("release_at", Value::Float(10.0))]);
        let step = node.step(Some(message), &mut ctx.step("Hold")).unwrap();
        assert_eq!(step.processing_delay, SimTime::ZERO);
    }

    #[test]
    fn test_key_delay_iso_datetime() {
        let mut ctx = Ctx::new(); // epoch 2024-01-01T00:00:00Z
        let mut node = KeyDelayTime::from_options(&options(&[
            ("delay_key", Value::Str("release_at".into())),
            ("convert_iso_datetime", Value::Bool(true)),
        ]))
        .unwrap();
        let message = message_with(&[("release_at", Value::Str("2024-01-01T00:02:00Z".into()))]);
        let step = node.step(Some(message), &mut ctx.step("Hold")).unwrap();
        assert_eq!(step.processing_delay, SimTime::from_secs(120.0));
    }

    #[test]
    fn test_mathis_delay_formula() {
        let mut ctx = Ctx::new();
        let mut node = MathisDelay::from_options(&Options::default()).unwrap();
        let message = message_with(&[("size_mbits", Value::Float(1000.0))]);
        let step = node.step(Some(message), &mut ctx.step("Tcp")).unwrap();

        // throughput = 1460 * 0.93 / (0.1 * sqrt(0.001))
        let expected_throughput = 1460.0 * 0.93 / (0.1 * 0.001f64.sqrt());
        let expected_delay = 1000.0 / expected_throughput;
        assert_eq!(step.processing_delay, SimTime::from_secs(expected_delay));
        let throughput = step.outputs[0].get("throughput").unwrap().as_f64().unwrap();
        assert!((throughput - expected_throughput).abs() < 1e-6);
        assert!(step.outputs[0].get("readable_delay").is_some());
    }

    #[test]
    fn test_mathis_message_params_override_config() {
        let mut ctx = Ctx::new();
        let mut node = MathisDelay::from_options(&Options::default()).unwrap();
        let message = message_with(&[
            ("size_mbits", Value::Float(100.0)),
            ("packet_loss", Value::Float(0.0)),
        ]);
        let step = node.step(Some(message), &mut ctx.step("Tcp")).unwrap();
        // Lossless link: unconstrained, so no delay.
        assert_eq!(step.processing_delay, SimTime::ZERO);
    }

    #[test]
    fn test_maximizer_picks_max() {
        let mut ctx = Ctx::new();
        let mut node = Maximizer::from_options(&options(&[("key", Value::Str("values".into()))])).unwrap();
        let values: Vec<Value> = [3, 1, 4, 1, 5, 9, 2, 6].iter().map(|i| Value::Int(*i)).collect();
        let message = message_with(&[("values", Value::List(values))]);
        let step = node.step(Some(message), &mut ctx.step("Max")).unwrap();
        assert_eq!(step.outputs[0].get("values"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_minimizer_picks_min() {
        let mut ctx = Ctx::new();
        let mut node = Minimizer::from_options(&options(&[("key", Value::Str("values".into()))])).unwrap();
        let values = vec![Value::Float(2.5), Value::Float(0.5), Value::Float(1.0)];
        let message = message_with(&[("values", Value::List(values))]);
        let step = node.step(Some(message), &mut ctx.step("Min")).unwrap();
        assert_eq!(step.outputs[0].get("values"), Some(&Value::Float(0.5)));
    }

    #[test]
    fn test_extremizer_missing_key_is_a_step_error() {
        let mut ctx = Ctx::new();
        let mut node = Maximizer::from_options(&options(&[("key", Value::Str("values".into()))])).unwrap();
        let err = node.step(Some(message_with(&[])), &mut ctx.step("Max")).unwrap_err();
        assert!(matches!(err, SimError::StepFailed { .. }));
    }

    #[test]
    fn test_combiner_collects_then_forwards() {
        let mut ctx = Ctx::new();
        let mut node = Combiner::from_options(&options(&[("num_messages", Value::Int(3))])).unwrap();

        for size in [10, 20] {
            let message = message_with(&[("size_mbits", Value::Int(size))]);
            let step = node.step(Some(message), &mut ctx.step("Combine")).unwrap();
            assert!(step.outputs.is_empty());
        }

        let message = message_with(&[("size_mbits", Value::Int(30))]);
        let step = node.step(Some(message), &mut ctx.step("Combine")).unwrap();
        assert_eq!(step.outputs.len(), 1);
        let combined = step.outputs[0].get("size_mbits").unwrap().as_list().unwrap();
        assert_eq!(combined, &[Value::Int(10), Value::Int(20), Value::Int(30)]);
    }

    #[test]
    fn test_partitioner_splits_list_into_messages() {
        let mut ctx = Ctx::new();
        let mut node = Partitioner::from_options(&options(&[("key", Value::Str("values".into()))])).unwrap();
        let values = vec![Value::Int(3), Value::Int(1), Value::Int(4)];
        let message = message_with(&[("values", Value::List(values))]);

        let step = node.step(Some(message), &mut ctx.step("Split")).unwrap();
        assert_eq!(step.outputs.len(), 3);
        let split: Vec<&Value> = step.outputs.iter().map(|m| m.get("values").unwrap()).collect();
        assert_eq!(split, vec![&Value::Int(3), &Value::Int(1), &Value::Int(4)]);
        // The copies share the input identity, like edge fan-out copies.
        for output in &step.outputs {
            assert_eq!(output.id, "m0");
        }
    }

    #[test]
    fn test_partitioner_empty_list_consumes_message() {
        let mut ctx = Ctx::new();
        let mut node = Partitioner::from_options(&options(&[("key", Value::Str("values".into()))])).unwrap();
        let message = message_with(&[("values", Value::List(vec![]))]);
        let step = node.step(Some(message), &mut ctx.step("Split")).unwrap();
        assert!(step.outputs.is_empty());
    }

    #[test]
    fn test_partitioner_missing_key_is_a_step_error() {
        let mut ctx = Ctx::new();
        let mut node = Partitioner::from_options(&options(&[("key", Value::Str("values".into()))])).unwrap();
        let err = node.step(Some(message_with(&[])), &mut ctx.step("Split")).unwrap_err();
        assert!(matches!(err, SimError::StepFailed { .. }));
    }

    #[test]
    fn test_combiner_then_partitioner_round_trip() {
        let mut ctx = Ctx::new();
        let mut combine = Combiner::from_options(&options(&[
            ("num_messages", Value::Int(2)),
            ("key", Value::Str("values".into())),
        ]))
        .unwrap();
        let mut split = Partitioner::from_options(&options(&[("key", Value::Str("values".into()))])).unwrap();

        combine
            .step(Some(message_with(&[("values", Value::Int(7))])), &mut ctx.step("Combine"))
            .unwrap();
        let combined = combine
            .step(Some(message_with(&[("values", Value::Int(8))])), &mut ctx.step("Combine"))
            .unwrap();
        let step = split.step(Some(combined.outputs[0].clone()), &mut ctx.step("Split")).unwrap();

        let values: Vec<&Value> = step.outputs.iter().map(|m| m.get("values").unwrap()).collect();
        assert_eq!(values, vec![&Value::Int(7), &Value::Int(8)]);
    }

    #[test]
    fn test_sink_counts_receipts() {
        let mut ctx = Ctx::new();
        let mut sink = Sink::from_options(&Options::default()).unwrap();
        for _ in 0..3 {
            let step = sink.step(Some(message_with(&[])), &mut ctx.step("Sink")).unwrap();
            assert!(step.outputs.is_empty());
        }
        assert_eq!(sink.receipts(), 3);
        assert_eq!(sink.state_summary(), "receipts=3");
    }

    #[test]
    fn test_options_unknown_key_detection() {
        let mut map = BTreeMap::new();
        map.insert("time_delay".to_string(), Value::Float(1.0));
        map.insert("tyme_delay".to_string(), Value::Float(1.0));
        let options = Options(map);
        assert_eq!(options.unknown_keys(DELAY_TIME_OPTIONS), vec!["tyme_delay"]);
    }
}
