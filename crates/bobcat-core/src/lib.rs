//! # bobcat-core
//!
//! Common types and traits for the bobcat simulation framework.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`]) and epoch mapping
//! - Payload values ([`Value`]) and the message envelope ([`Message`])
//! - Event system ([`Event`], [`EventKind`])
//! - Simulation context ([`SimContext`])
//! - The node step contract ([`Behavior`], [`Step`], [`StepContext`])
//! - Configuration coercion ([`Options`])
//! - A promise worker pool ([`PromisePool`])

use hifitime::TimeUnits;
pub use hifitime::Epoch;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Node not found in the scenario graph.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A configuration option could not be coerced to its declared type.
    #[error("Cannot coerce option '{key}' from {value} to {target}")]
    Coercion {
        /// Option name.
        key: String,
        /// Raw value as loaded.
        value: String,
        /// Target type name.
        target: &'static str,
    },

    /// Malformed timestamp string.
    #[error("Invalid ISO-8601 UTC timestamp: {0}")]
    BadTimestamp(String),

    /// Position query failed (bad TLE, propagation error).
    #[error("Position query failed for {name}: {message}")]
    Position {
        /// Provider name.
        name: String,
        /// Diagnostic.
        message: String,
    },

    /// A node's step raised an error.
    #[error("Step failed at t={simtime:.6} in node '{node}' (msg {message_id}): {message}")]
    StepFailed {
        /// Simulation time in seconds.
        simtime: f64,
        /// Node name.
        node: String,
        /// ID of the message being processed, or "-" for source steps.
        message_id: String,
        /// Diagnostic.
        message: String,
    },

    /// Simulation time overflow.
    #[error("Simulation time overflow")]
    TimeOverflow,

    /// Artifact IO failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in microseconds since the scenario epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from microseconds.
    pub fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1000)
    }

    /// Create from seconds (float). Negative inputs clamp to zero.
    pub fn from_secs(s: f64) -> Self {
        if s.is_finite() && s > 0.0 {
            SimTime((s * 1_000_000.0).round() as u64)
        } else {
            SimTime(0)
        }
    }

    /// Get as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get as seconds (float).
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Add a duration, failing on overflow.
    pub fn checked_add(&self, duration: SimTime) -> Option<SimTime> {
        self.0.checked_add(duration.0).map(SimTime)
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.as_secs_f64())
    }
}

/// Parse a strict ISO-8601 UTC timestamp (`YYYY-MM-DDTHH:MM:SS[.ffffff]Z`).
pub fn parse_epoch(text: &str) -> Result<Epoch, SimError> {
    let bad = || SimError::BadTimestamp(text.to_string());
    let trimmed = text.trim().strip_suffix('Z').ok_or_else(bad)?;
    let (date, time) = trimmed.split_once('T').ok_or_else(bad)?;

    let mut date_parts = date.split('-');
    let year: i32 = date_parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let month: u8 = date_parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let day: u8 = date_parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    if date_parts.next().is_some() {
        return Err(bad());
    }

    let (hms, frac) = match time.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (time, None),
    };
    let mut time_parts = hms.split(':');
    let hour: u8 = time_parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let minute: u8 = time_parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let second: u8 = time_parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    if time_parts.next().is_some() {
        return Err(bad());
    }

    let nanos: u32 = match frac {
        None => 0,
        Some(f) => {
            if f.is_empty() || f.len() > 9 || !f.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            let digits: u32 = f.parse().map_err(|_| bad())?;
            digits * 10u32.pow(9 - f.len() as u32)
        }
    };

    Ok(Epoch::from_gregorian_utc(year, month, day, hour, minute, second, nanos))
}

/// Format an epoch as an ISO-8601 UTC timestamp with microsecond precision.
pub fn format_epoch(epoch: Epoch) -> String {
    let (year, month, day, hour, minute, second, nanos) = epoch.to_gregorian_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}Z",
        year,
        month,
        day,
        hour,
        minute,
        second,
        nanos / 1000
    )
}

/// Absolute UTC instant for a simtime offset from the given epoch.
pub fn utc_at(epoch: Epoch, simtime: SimTime) -> Epoch {
    epoch + simtime.as_secs_f64().seconds()
}

// ============================================================================
// Payload Values
// ============================================================================

/// A primitive payload value carried in a message field.
///
/// Scenario files and node transformations only ever produce these shapes;
/// ISO timestamps travel as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// String (including ISO timestamps).
    Str(String),
    /// Short list of values.
    List(Vec<Value>),
    /// Short map of values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Numeric view. Strings that parse as numbers count as numeric,
    /// matching how predicates compare loaded scenario literals.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view. Accepts the YAML-ish spellings "True"/"true".
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Str(s) => match s.trim() {
                "True" | "true" => Some(true),
                "False" | "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// String view (no conversion).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// List view.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Render for logs and predicate text matching.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => {
                if *b {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

// ============================================================================
// Message Envelope
// ============================================================================

/// Conventional payload key mirroring the message identity.
pub const ID_KEY: &str = "ID";

/// Default payload key holding the message size in megabits.
pub const DEFAULT_SIZE_KEY: &str = "size_mbits";

/// A message traveling through the scenario graph.
///
/// The payload is open: free-form field names mapping to [`Value`]s. The
/// envelope adds identity, creation time, and per-hop accounting maintained
/// by the runtime. Messages are deep-copied on every edge fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identity.
    pub id: String,
    /// Open payload fields.
    pub payload: BTreeMap<String, Value>,
    /// Simtime at which this message was created.
    pub created: SimTime,
    /// Simtime at which the last hop dispatched this message.
    pub time_sent: SimTime,
    /// Name of the node that dispatched this message, if any.
    pub last_node: Option<String>,
    /// Time spent queued before its last step started.
    pub wait_time: SimTime,
    /// Reservation span of the last step that processed it.
    pub processing_time: SimTime,
    /// Link delay applied on the way to the next node.
    pub next_hop_delay: SimTime,
}

impl Message {
    /// Create a message with the given identity; the `ID` payload field is
    /// set to match.
    pub fn new(id: String, created: SimTime) -> Self {
        let mut payload = BTreeMap::new();
        payload.insert(ID_KEY.to_string(), Value::Str(id.clone()));
        Message {
            id,
            payload,
            created,
            time_sent: created,
            last_node: None,
            wait_time: SimTime::ZERO,
            processing_time: SimTime::ZERO,
            next_hop_delay: SimTime::ZERO,
        }
    }

    /// Set a payload field.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(key.into(), value.into());
    }

    /// Read a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Message size under the given size key, defaulting to zero.
    pub fn size(&self, size_key: &str) -> f64 {
        self.payload.get(size_key).and_then(Value::as_f64).unwrap_or(0.0)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Index of a node in the scenario graph. Link targets are resolved through
/// an engine-owned name table, so the graph may be cyclic without ownership
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A message lands on a destination node's input queue.
    Arrival {
        /// Destination node.
        node: NodeId,
        /// The message, already carrying updated hop accounting.
        message: Message,
    },
    /// A node's reservation window ends; its outputs dispatch now.
    Ready {
        /// The reserved node.
        node: NodeId,
        /// Outputs produced by the step that opened the window.
        outputs: Vec<Message>,
    },
    /// Bootstrap or re-arm tick for a source node.
    Wake {
        /// The source node.
        node: NodeId,
    },
    /// End the simulation.
    SimulationEnd,
}

/// A scheduled simulation event.
///
/// Ordering is a min-heap on `(time, seq)`: events at equal due times fire
/// in insertion order, which pins run-to-run determinism.
#[derive(Debug, Clone)]
pub struct Event {
    /// Due simulation time.
    pub time: SimTime,
    /// Monotonic insertion sequence, assigned by [`SimContext`].
    pub seq: u64,
    /// Payload.
    pub kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest time, lowest seq first)
        other.time.cmp(&self.time).then_with(|| other.seq.cmp(&self.seq))
    }
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Engine-scoped clock, random stream, and event buffer.
///
/// Replaces the process-wide state of older simulators: the engine owns the
/// RNG and the clock, nodes see them only through [`StepContext`].
pub struct SimContext {
    time: SimTime,
    rng: ChaCha8Rng,
    epoch: Epoch,
    end_simtime: SimTime,
    pending_events: Vec<Event>,
    next_seq: u64,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64, epoch: Epoch, end_simtime: SimTime) -> Self {
        SimContext {
            time: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            epoch,
            end_simtime,
            pending_events: Vec::new(),
            next_seq: 0,
        }
    }

    /// Current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Set the current time (used by the event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Scenario epoch (the UTC instant of simtime zero).
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Configured end of the run.
    pub fn end_simtime(&self) -> SimTime {
        self.end_simtime
    }

    /// Absolute UTC instant for the current simtime.
    pub fn now_utc(&self) -> Epoch {
        utc_at(self.epoch, self.time)
    }

    /// Mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Post an event to occur after a delay.
    pub fn post_event(&mut self, delay: SimTime, kind: EventKind) {
        let event = Event {
            time: self.time + delay,
            seq: self.next_seq,
            kind,
        };
        self.next_seq += 1;
        self.pending_events.push(event);
    }

    /// Post an event to occur immediately (at the current time).
    pub fn post_immediate(&mut self, kind: EventKind) {
        self.post_event(SimTime::ZERO, kind);
    }

    /// Take all pending events (used by the event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Draw a fresh message identity from the engine random stream.
    pub fn fresh_message_id(&mut self) -> String {
        fresh_uuid(&mut self.rng)
    }
}

fn fresh_uuid(rng: &mut ChaCha8Rng) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

// ============================================================================
// Position Provider
// ============================================================================

/// Geodetic fix returned by position queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticFix {
    /// Latitude in degrees.
    pub lat_deg: f64,
    /// Longitude in degrees.
    pub lon_deg: f64,
    /// Altitude in kilometers.
    pub alt_km: f64,
    /// Inertial speed in km/s.
    pub velocity_km_s: f64,
}

/// A geographic or orbital entity answering position queries at any simtime.
///
/// Providers are shared read-only after construction; queries are idempotent.
pub trait PositionProvider: Send + Sync {
    /// Geodetic location at `epoch + simtime`.
    fn location(&self, simtime: SimTime, epoch: Epoch) -> Result<GeodeticFix, SimError>;

    /// Inertial cartesian position (km) and velocity (km/s) at
    /// `epoch + simtime`.
    fn coords(&self, simtime: SimTime, epoch: Epoch) -> Result<([f64; 3], [f64; 3]), SimError>;
}

// ============================================================================
// Node Step Contract
// ============================================================================

/// What one step invocation asks of the runtime.
///
/// The node is reserved for `setup_delay + processing_delay`; at the end of
/// that window the outputs dispatch across the node's outgoing links and the
/// node either takes its next queued input (same simtime) or goes idle.
#[derive(Debug, Default)]
pub struct Step {
    /// Reservation time before outputs exist (queueing/planning).
    pub setup_delay: SimTime,
    /// Reservation time while producing outputs.
    pub processing_delay: SimTime,
    /// Ordered outputs to dispatch at the ready time.
    pub outputs: Vec<Message>,
}

impl Step {
    /// An idle step: no reservation, no outputs.
    pub fn idle() -> Self {
        Step::default()
    }

    /// Emit outputs after the given delays (seconds; negatives clamp).
    pub fn emit(setup_secs: f64, processing_secs: f64, outputs: Vec<Message>) -> Self {
        Step {
            setup_delay: SimTime::from_secs(setup_secs),
            processing_delay: SimTime::from_secs(processing_secs),
            outputs,
        }
    }
}

/// Per-step view of the engine handed to a node.
pub struct StepContext<'a> {
    /// Current simulation time.
    pub now: SimTime,
    /// Scenario epoch.
    pub epoch: Epoch,
    /// Configured end of the run.
    pub end_simtime: SimTime,
    /// Name of the node being stepped.
    pub node_name: &'a str,
    /// Engine random stream.
    pub rng: &'a mut ChaCha8Rng,
    /// Position provider of the attached meta-node, if any. Shared so long
    /// propagation windows can be offloaded to the worker pool.
    pub position: Option<&'a std::sync::Arc<dyn PositionProvider>>,
    /// Root directory for CZML artifacts, if visualization is enabled.
    pub czml_root: Option<&'a std::path::Path>,
    /// Worker pool for long-running node computations, if enabled.
    pub pool: Option<&'a PromisePool>,
}

impl StepContext<'_> {
    /// Absolute UTC instant for the current simtime.
    pub fn now_utc(&self) -> Epoch {
        utc_at(self.epoch, self.now)
    }

    /// Draw a fresh message identity.
    pub fn fresh_message_id(&mut self) -> String {
        fresh_uuid(self.rng)
    }

    /// Create a message stamped with a fresh identity at the current time.
    pub fn new_message(&mut self) -> Message {
        let id = self.fresh_message_id();
        Message::new(id, self.now)
    }
}

/// The contract every node behavior satisfies.
///
/// `step` is invoked with `Some(message)` when an input is taken from the
/// node's queue, or with `None` to bootstrap and re-arm sources. A step must
/// not block on external I/O; time passes only through the returned delays.
pub trait Behavior: Send {
    /// Consume at most one input and return the reservation delays plus the
    /// outputs to dispatch at the end of the window.
    fn step(&mut self, input: Option<Message>, ctx: &mut StepContext<'_>) -> Result<Step, SimError>;

    /// Whether this behavior boots with `step(None)` at scenario start.
    fn is_source(&self) -> bool {
        false
    }

    /// Whether a source wants another `step(None)` at its ready time.
    fn active(&self) -> bool {
        false
    }

    /// One-line internal state description for end-of-run dumps.
    fn state_summary(&self) -> String {
        String::new()
    }
}

// ============================================================================
// Configuration Coercion
// ============================================================================

/// Declared option of a node type: name, default rendering, and help line.
#[derive(Debug, Clone, Copy)]
pub struct OptionDef {
    /// Option name as written in scenario files.
    pub name: &'static str,
    /// Default value rendered for listings.
    pub default: &'static str,
    /// One-line description.
    pub help: &'static str,
}

/// Resolved configuration of a node: option name to raw value.
///
/// One coercion helper per target type; a present-but-unparseable value is a
/// load-time error, a missing key yields the documented default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options(pub BTreeMap<String, Value>);

impl Options {
    /// Raw value, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the option was given.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    fn coercion(&self, key: &str, target: &'static str) -> SimError {
        SimError::Coercion {
            key: key.to_string(),
            value: self.0.get(key).map(|v| v.render()).unwrap_or_default(),
            target,
        }
    }

    /// Coerce to bool, with default.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, SimError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.coercion(key, "bool")),
        }
    }

    /// Coerce to f64, with default.
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, SimError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| self.coercion(key, "float")),
        }
    }

    /// Coerce to i64, with default. Floats truncate like the original.
    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, SimError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(Value::Int(i)) => Ok(*i),
            Some(v) => v
                .as_f64()
                .map(|f| f as i64)
                .ok_or_else(|| self.coercion(key, "int")),
        }
    }

    /// Coerce to string, with default.
    pub fn str_or(&self, key: &str, default: &str) -> String {
        match self.0.get(key) {
            None => default.to_string(),
            Some(v) => v.render(),
        }
    }

    /// Coerce to an ISO-8601 UTC instant, with default.
    pub fn epoch_or(&self, key: &str, default: Epoch) -> Result<Epoch, SimError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(Value::Str(s)) => parse_epoch(s),
            Some(_) => Err(self.coercion(key, "timestamp")),
        }
    }

    /// List view of an option, if present.
    pub fn list(&self, key: &str) -> Option<&[Value]> {
        self.0.get(key).and_then(Value::as_list)
    }

    /// Option names not in `known` (plus the shared base options). These are
    /// warned about by the loader, never fatal.
    pub fn unknown_keys(&self, known: &[OptionDef]) -> Vec<&str> {
        const BASE_OPTIONS: &[&str] = &["type", "msg_size_key"];
        self.0
            .keys()
            .map(String::as_str)
            .filter(|k| !BASE_OPTIONS.contains(k) && !known.iter().any(|d| d.name == *k))
            .collect()
    }
}

// ============================================================================
// Promise Pool
// ============================================================================

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool for offloading long-running node computations.
///
/// The engine blocks on every result before advancing simulated time past
/// the enclosing ready event, so wall-clock runs faster while simulated
/// semantics stay identical.
pub struct PromisePool {
    sender: std::sync::mpsc::Sender<Job>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl PromisePool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = std::sync::mpsc::channel::<Job>();
        let receiver = std::sync::Arc::new(std::sync::Mutex::new(receiver));
        let workers = (0..threads.max(1))
            .map(|index| {
                let receiver = std::sync::Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("bobcat-promise-{index}"))
                    .spawn(move || loop {
                        let job = {
                            let guard = match receiver.lock() {
                                Ok(guard) => guard,
                                Err(_) => return,
                            };
                            guard.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => return,
                        }
                    })
                    .expect("spawn promise worker")
            })
            .collect();
        PromisePool { sender, workers }
    }

    /// Run a computation on a worker and wait for its result.
    pub fn run<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(f());
        });
        self.sender
            .send(job)
            .expect("promise pool workers have exited");
        rx.recv().expect("promise job dropped its result")
    }
}

impl Drop for PromisePool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain and exit.
        let (sender, _) = std::sync::mpsc::channel();
        drop(std::mem::replace(&mut self.sender, sender));
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Where a run's artifacts land. Kept here so node behaviors can address the
/// CZML tree without depending on the runner.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// Results directory for this run.
    pub results_dir: PathBuf,
    /// Network name label, used in the CZML subtree.
    pub network_name: String,
}

impl ArtifactPaths {
    /// `<results>/czml/<network>` directory.
    pub fn czml_dir(&self) -> PathBuf {
        self.results_dir.join("czml").join(&self.network_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_conversions() {
        let time = SimTime::from_secs(1.5);
        assert_eq!(time.as_micros(), 1_500_000);
        assert!((time.as_secs_f64() - 1.5).abs() < 0.0001);
        assert_eq!(SimTime::from_secs(-3.0), SimTime::ZERO);
    }

    #[test]
    fn test_sim_time_arithmetic() {
        let t1 = SimTime::from_millis(100);
        let t2 = SimTime::from_millis(50);
        assert_eq!((t1 + t2).as_micros(), 150_000);
        assert_eq!((t1 - t2).as_micros(), 50_000);
        assert_eq!((t2 - t1), SimTime::ZERO);
    }

    #[test]
    fn test_parse_and_format_epoch() {
        let epoch = parse_epoch("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(format_epoch(epoch), "2024-01-01T00:00:00.000000Z");

        let with_frac = parse_epoch("2024-06-15T12:30:45.250Z").unwrap();
        assert_eq!(format_epoch(with_frac), "2024-06-15T12:30:45.250000Z");

        assert!(parse_epoch("2024-01-01 00:00:00").is_err());
        assert!(parse_epoch("not-a-date").is_err());
    }

    #[test]
    fn test_utc_at_offsets() {
        let epoch = parse_epoch("2024-01-01T00:00:00Z").unwrap();
        let later = utc_at(epoch, SimTime::from_secs(90.0));
        assert_eq!(format_epoch(later), "2024-01-01T00:01:30.000000Z");
    }

    #[test]
    fn test_event_heap_ordering() {
        let mut heap = std::collections::BinaryHeap::new();
        let mut ctx = SimContext::new(1, Epoch::from_gregorian_utc(2024, 1, 1, 0, 0, 0, 0), SimTime::from_secs(100.0));
        ctx.post_event(SimTime::from_secs(5.0), EventKind::SimulationEnd);
        ctx.post_event(SimTime::from_secs(1.0), EventKind::Wake { node: NodeId(0) });
        ctx.post_event(SimTime::from_secs(1.0), EventKind::Wake { node: NodeId(1) });
        for event in ctx.take_pending_events() {
            heap.push(event);
        }

        let first = heap.pop().unwrap();
        assert_eq!(first.time, SimTime::from_secs(1.0));
        assert!(matches!(first.kind, EventKind::Wake { node: NodeId(0) }));

        // Equal due times fire in insertion order.
        let second = heap.pop().unwrap();
        assert_eq!(second.time, SimTime::from_secs(1.0));
        assert!(matches!(second.kind, EventKind::Wake { node: NodeId(1) }));

        assert_eq!(heap.pop().unwrap().time, SimTime::from_secs(5.0));
    }

    #[test]
    fn test_message_ids_are_deterministic() {
        let epoch = Epoch::from_gregorian_utc(2024, 1, 1, 0, 0, 0, 0);
        let mut a = SimContext::new(42, epoch, SimTime::ZERO);
        let mut b = SimContext::new(42, epoch, SimTime::ZERO);
        assert_eq!(a.fresh_message_id(), b.fresh_message_id());
        assert_ne!(a.fresh_message_id(), a.fresh_message_id());
    }

    #[test]
    fn test_value_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Str("5.5".into()).as_f64(), Some(5.5));
        assert_eq!(Value::Str("True".into()).as_bool(), Some(true));
        assert_eq!(Value::Bool(false).render(), "False");
        assert_eq!(Value::Str("red".into()).as_f64(), None);
    }

    #[test]
    fn test_options_coercion() {
        let mut map = BTreeMap::new();
        map.insert("float_value".to_string(), Value::Float(6.0));
        map.insert("str_value".to_string(), Value::Str("5.5".into()));
        map.insert("flag".to_string(), Value::Str("True".into()));
        map.insert("bad".to_string(), Value::Str("nope".into()));
        let options = Options(map);

        assert_eq!(options.f64_or("float_value", 0.4).unwrap(), 6.0);
        assert_eq!(options.f64_or("str_value", 0.4).unwrap(), 5.5);
        assert_eq!(options.f64_or("no_value", 0.4).unwrap(), 0.4);
        assert_eq!(options.bool_or("flag", false).unwrap(), true);
        assert!(options.f64_or("bad", 0.0).is_err());
        assert_eq!(options.i64_or("float_value", -1).unwrap(), 6);
    }

    #[test]
    fn test_promise_pool_runs_jobs() {
        let pool = PromisePool::new(2);
        let result = pool.run(|| (0..10).sum::<i32>());
        assert_eq!(result, 45);
    }
}
