//! # bobcat-nodes
//!
//! Node behavior library for the bobcat simulator.
//!
//! Every behavior satisfies the [`Behavior`] contract from `bobcat-core`:
//! a resumable step consuming at most one input message and returning
//! `(setup_delay, processing_delay, outputs)`. The factory here is what the
//! scenario loader dispatches a node's `type` string through.
//!
//! Behaviors by family:
//! - message sources: [`RandomDataSource`], [`PositionReport`]
//! - network delays: [`DelayTime`], [`DelaySize`], [`KeyDelayTime`],
//!   [`MathisDelay`]
//! - transforms: [`AddKeyValue`], [`Maximizer`], [`Minimizer`],
//!   [`Combiner`], [`Partitioner`]
//! - gates: [`AndGate`]
//! - aerospace: [`Propagator`]
//! - sinks: [`Sink`]

pub mod aerospace;
pub mod gates;
pub mod network;
pub mod sources;

pub use aerospace::Propagator;
pub use gates::AndGate;
pub use network::{
    AddKeyValue, Combiner, DelaySize, DelayTime, KeyDelayTime, MathisDelay, Maximizer, Minimizer,
    Partitioner, Sink,
};
pub use sources::{PositionReport, RandomDataSource};

use bobcat_core::{Behavior, OptionDef, Options, SimError};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while instantiating node behaviors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The `type` string matched no registered behavior.
    #[error("Node type not loaded in factory: {0}")]
    UnknownType(String),

    /// A gate condition failed to parse.
    #[error(transparent)]
    Predicate(#[from] bobcat_predicate::PredicateError),

    /// Configuration coercion failed.
    #[error(transparent)]
    Sim(#[from] SimError),
}

// ============================================================================
// Node Type Registry
// ============================================================================

/// A registered node type: factory name, description, declared options.
#[derive(Debug, Clone, Copy)]
pub struct NodeTypeDef {
    /// Type string as written in scenario files (matched case-insensitively).
    pub name: &'static str,
    /// One-line description.
    pub help: &'static str,
    /// Declared options with defaults.
    pub options: &'static [OptionDef],
}

/// All registered node types, in listing order.
pub fn node_types() -> &'static [NodeTypeDef] {
    &[
        NodeTypeDef {
            name: "RandomDataSource",
            help: "Emits messages of random size on a random cooldown",
            options: sources::RANDOM_DATA_SOURCE_OPTIONS,
        },
        NodeTypeDef {
            name: "PositionReport",
            help: "Emits the attached meta-node position on a fixed period",
            options: sources::POSITION_REPORT_OPTIONS,
        },
        NodeTypeDef {
            name: "AddKeyValue",
            help: "Adds a key/value pair to each message",
            options: network::ADD_KEY_VALUE_OPTIONS,
        },
        NodeTypeDef {
            name: "DelayTime",
            help: "Delays each message by a fixed time",
            options: network::DELAY_TIME_OPTIONS,
        },
        NodeTypeDef {
            name: "DelaySize",
            help: "Delays each message by size divided by rate",
            options: network::DELAY_SIZE_OPTIONS,
        },
        NodeTypeDef {
            name: "KeyDelayTime",
            help: "Holds each message until the simtime named by one of its fields",
            options: network::KEY_DELAY_TIME_OPTIONS,
        },
        NodeTypeDef {
            name: "MathisDelay",
            help: "Delays each message by TCP throughput from the Mathis equation",
            options: network::MATHIS_DELAY_OPTIONS,
        },
        NodeTypeDef {
            name: "AndGate",
            help: "Blocks messages until all conditions have been satisfied",
            options: gates::AND_GATE_OPTIONS,
        },
        NodeTypeDef {
            name: "Maximizer",
            help: "Replaces a list-valued field with its maximum",
            options: network::EXTREMIZER_OPTIONS,
        },
        NodeTypeDef {
            name: "Minimizer",
            help: "Replaces a list-valued field with its minimum",
            options: network::EXTREMIZER_OPTIONS,
        },
        NodeTypeDef {
            name: "Combiner",
            help: "Collects a keyed value from N messages into one list",
            options: network::COMBINER_OPTIONS,
        },
        NodeTypeDef {
            name: "Partitioner",
            help: "Splits a list-valued field into one message per element",
            options: network::PARTITIONER_OPTIONS,
        },
        NodeTypeDef {
            name: "Propagator",
            help: "Attaches a time-tagged ephemeris of the meta-node to each message",
            options: aerospace::PROPAGATOR_OPTIONS,
        },
        NodeTypeDef {
            name: "Sink",
            help: "Consumes messages and counts receipts",
            options: network::SINK_OPTIONS,
        },
    ]
}

/// Look up a registered type by its scenario spelling.
pub fn find_node_type(type_name: &str) -> Option<&'static NodeTypeDef> {
    let lowered = type_name.to_ascii_lowercase();
    // MathisThroughputDelay survives as a spelling of MathisDelay.
    let lowered = if lowered == "mathisthroughputdelay" {
        "mathisdelay".to_string()
    } else {
        lowered
    };
    node_types().iter().find(|def| def.name.to_ascii_lowercase() == lowered)
}

/// Instantiate the behavior for a node's `type` string and resolved options.
pub fn build_behavior(type_name: &str, options: &Options) -> Result<Box<dyn Behavior>, NodeError> {
    let def = find_node_type(type_name).ok_or_else(|| NodeError::UnknownType(type_name.to_string()))?;
    let behavior: Box<dyn Behavior> = match def.name {
        "RandomDataSource" => Box::new(RandomDataSource::from_options(options)?),
        "PositionReport" => Box::new(PositionReport::from_options(options)?),
        "AddKeyValue" => Box::new(AddKeyValue::from_options(options)?),
        "DelayTime" => Box::new(DelayTime::from_options(options)?),
        "DelaySize" => Box::new(DelaySize::from_options(options)?),
        "KeyDelayTime" => Box::new(KeyDelayTime::from_options(options)?),
        "MathisDelay" => Box::new(MathisDelay::from_options(options)?),
        "AndGate" => Box::new(AndGate::from_options(options)?),
        "Maximizer" => Box::new(Maximizer::from_options(options)?),
        "Minimizer" => Box::new(Minimizer::from_options(options)?),
        "Combiner" => Box::new(Combiner::from_options(options)?),
        "Partitioner" => Box::new(Partitioner::from_options(options)?),
        "Propagator" => Box::new(Propagator::from_options(options)?),
        "Sink" => Box::new(Sink::from_options(options)?),
        _ => unreachable!("registry and factory are kept in sync"),
    };
    Ok(behavior)
}

/// Message size key shared by all behaviors that read sizes.
pub(crate) fn size_key(options: &Options) -> String {
    options.str_or("msg_size_key", bobcat_core::DEFAULT_SIZE_KEY)
}

#[cfg(test)]
pub(crate) mod testutil {
    use bobcat_core::{SimTime, StepContext};
    use hifitime::Epoch;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Bundle owning everything a `StepContext` borrows.
    pub struct Ctx {
        pub now: SimTime,
        pub epoch: Epoch,
        pub end: SimTime,
        pub rng: ChaCha8Rng,
        pub position: Option<std::sync::Arc<dyn bobcat_core::PositionProvider>>,
        pub czml_root: Option<std::path::PathBuf>,
    }

    impl Ctx {
        pub fn new() -> Self {
            Ctx {
                now: SimTime::ZERO,
                epoch: Epoch::from_gregorian_utc(2024, 1, 1, 0, 0, 0, 0),
                end: SimTime::from_secs(9001.0),
                rng: ChaCha8Rng::seed_from_u64(7),
                position: None,
                czml_root: None,
            }
        }

        pub fn step<'a>(&'a mut self, name: &'a str) -> StepContext<'a> {
            StepContext {
                now: self.now,
                epoch: self.epoch,
                end_simtime: self.end,
                node_name: name,
                rng: &mut self.rng,
                position: self.position.as_ref(),
                czml_root: self.czml_root.as_deref(),
                pool: None,
            }
        }
    }
}
