//! Gate behaviors: nodes that block messages until conditions are met.

use crate::NodeError;
use bobcat_core::{Behavior, Message, OptionDef, Options, SimError, Step, StepContext};
use bobcat_predicate::Predicate;
use tracing::debug;

/// Declared options of [`AndGate`].
pub const AND_GATE_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "conditions", default: "[]", help: "Predicate strings that must all hold" },
    OptionDef { name: "time_delay", default: "0.0", help: "Delay before released messages leave (s)" },
    OptionDef { name: "processing_delay", default: "0.0", help: "Reservation per arriving message (s)" },
    OptionDef { name: "drop_blocked_messages", default: "True", help: "Drop (true) or store (false) messages while closed" },
    OptionDef { name: "blocked_messages_FIFO", default: "True", help: "Release stored messages FIFO (true) or LIFO (false)" },
];

/// Blocks messages until all of its conditions have been satisfied.
///
/// Each condition is an ordinary link predicate. Arriving messages update
/// condition state: a field condition flips when a message carries that
/// field, and stays at its last value otherwise, so conditions may be built
/// up across several messages. `SimTime` conditions are re-evaluated on
/// every arrival. A gate with no conditions is always open.
///
/// ```yaml
/// Maneuver_Decision:
///     type: AndGate
///     conditions:
///         - "SimTime > 100"
///         - "Maneuver_Planned == True"
///     Xmit_Load_to_UL: ~
/// ```
///
/// While the gate is closed, messages are dropped by default; with
/// `drop_blocked_messages: false` they are stored and released the moment
/// the gate opens, ordered by their send time (FIFO or LIFO).
pub struct AndGate {
    conditions: Vec<Predicate>,
    condition_state: Vec<Option<bool>>,
    time_delay: f64,
    processing_delay: f64,
    drop_blocked: bool,
    release_fifo: bool,
    stored: Vec<Message>,
    dropped: u64,
}

impl AndGate {
    /// Build from resolved options. Condition parse failures are fatal.
    pub fn from_options(options: &Options) -> Result<Self, NodeError> {
        let conditions: Vec<Predicate> = options
            .list("conditions")
            .unwrap_or_default()
            .iter()
            .map(|raw| Predicate::parse(&raw.render()))
            .collect::<Result<_, _>>()?;
        let condition_state = vec![None; conditions.len()];
        Ok(AndGate {
            conditions,
            condition_state,
            time_delay: options.f64_or("time_delay", 0.0)?,
            processing_delay: options.f64_or("processing_delay", 0.0)?,
            drop_blocked: options.bool_or("drop_blocked_messages", true)?,
            release_fifo: options.bool_or("blocked_messages_FIFO", true)?,
            stored: Vec::new(),
            dropped: 0,
        })
    }

    fn update_conditions(&mut self, message: &Message, now_secs: f64) {
        for (index, condition) in self.conditions.iter().enumerate() {
            if condition.field() == "SimTime" {
                self.condition_state[index] = Some(condition.eval(now_secs, &message.payload));
            } else if message.payload.contains_key(condition.field()) {
                self.condition_state[index] = Some(condition.eval(now_secs, &message.payload));
            }
            // Field absent: keep the previous state.
        }
    }

    fn is_open(&self) -> bool {
        self.condition_state.iter().all(|state| *state == Some(true))
    }
}

impl Behavior for AndGate {
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError> {
        let Some(message) = input else {
            return Ok(Step::idle());
        };

        self.update_conditions(&message, ctx.now.as_secs_f64());

        let outputs = if self.is_open() {
            if self.drop_blocked {
                debug!(node = ctx.node_name, id = %message.id, "gates are open, message flows through");
                vec![message]
            } else {
                debug!(
                    node = ctx.node_name,
                    id = %message.id,
                    stored = self.stored.len(),
                    "gates are open, stored messages flow through"
                );
                let mut released: Vec<Message> = std::mem::take(&mut self.stored);
                released.push(message);
                released.sort_by_key(|m| m.time_sent);
                if !self.release_fifo {
                    released.reverse();
                }
                released
            }
        } else if !self.drop_blocked {
            debug!(node = ctx.node_name, id = %message.id, "gates are closed, message stored");
            self.stored.push(message);
            vec![]
        } else {
            debug!(node = ctx.node_name, id = %message.id, "gates are closed, message dropped");
            self.dropped += 1;
            vec![]
        };

        Ok(Step::emit(self.time_delay, self.processing_delay, outputs))
    }

    fn state_summary(&self) -> String {
        let state: Vec<String> = self
            .condition_state
            .iter()
            .map(|s| match s {
                Some(true) => "open".to_string(),
                Some(false) => "closed".to_string(),
                None => "unset".to_string(),
            })
            .collect();
        format!(
            "conditions=[{}] stored={} dropped={}",
            state.join(","),
            self.stored.len(),
            self.dropped
        )
    }
}
