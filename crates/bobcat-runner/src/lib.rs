//! # bobcat-runner
//!
//! Event loop and runner for the bobcat simulator.
//!
//! The [`EventLoop`] owns the scheduler (a min-heap of timed events), the
//! node runtime (input queues and reservation windows), and the link layer
//! (predicate-gated fan-out with per-link delivery delays). Determinism is
//! pinned by the heap's `(time, seq)` ordering, definition-ordered edge
//! iteration, and one seeded random stream owned by the simulation context:
//! a fixed scenario, seed, and epoch reproduce `node_log.txt` byte for
//! byte.
//!
//! ## Real-time mode
//!
//! The optional [`RealTimePacer`] sleeps between event pops so dispatch
//! tracks the wall clock. Strict mode aborts when the simulation cannot
//! keep up; non-strict warns once and continues at best effort.

pub mod output;
pub mod realtime;

pub use realtime::{RealTimeConfig, RealTimePacer};

use bobcat_core::{
    format_epoch, ArtifactPaths, Epoch, Event, EventKind, Message, NodeId, PromisePool, SimContext,
    SimError, SimTime, StepContext, Value,
};
use bobcat_model::{build_graph, BuiltNode, LinkDelaySpec, ModelError, Scenario};
use bobcat_nodes::network::mathis_throughput;
use bobcat_predicate::RANDOM_ROUTER_KEY;
use output::OutputWriters;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, warn};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while running a simulation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Scenario load or graph build failed.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// A node step failed; the run aborts.
    #[error("Simulation error: {0}")]
    Sim(#[from] SimError),

    /// Artifact IO failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Strict real-time mode fell behind the wall clock.
    #[error("Simulation too slow for real time mode ({behind_secs:.3}s behind)")]
    SimulationTooSlow {
        /// Lag behind the wall-clock target in seconds.
        behind_secs: f64,
    },
}

// ============================================================================
// Statistics
// ============================================================================

/// Streaming summary of one metric.
#[derive(Debug, Clone, Serialize)]
pub struct Accumulator {
    /// Number of samples.
    pub count: u64,
    /// Sum of samples.
    pub sum: f64,
    sumsq: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Accumulator {
            count: 0,
            sum: 0.0,
            sumsq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Accumulator {
    /// Record one sample.
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sumsq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Sample mean.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Sample standard deviation.
    pub fn std(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let variance = (self.sumsq - self.sum * self.sum / n) / (n - 1.0);
        variance.max(0.0).sqrt()
    }
}

/// One step's bookkeeping record, kept in a bounded per-node ring.
#[derive(Debug, Clone, Serialize)]
pub struct MsgRecord {
    /// Message identity.
    pub id: String,
    /// Simtime the message was sent to this node.
    pub time_received: f64,
    /// Queue wait before the step started.
    pub wait: f64,
    /// Full reservation window of the step.
    pub delay_to_next: f64,
    /// Processing part of the reservation.
    pub processing: f64,
    /// Message size.
    pub size: f64,
}

/// Per-node counters, updated atomically with the event transitions that
/// cause them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    /// Messages that arrived on the input queue.
    pub ingress: u64,
    /// Steps executed.
    pub processed: u64,
    /// Message copies sent across outgoing links.
    pub egress: u64,
    /// Messages that matched no outgoing edge and died here.
    pub terminated: u64,
    /// Predicate drops per outgoing edge.
    pub drops: BTreeMap<String, u64>,
    /// Deepest the input queue ever got.
    pub max_queue_depth: usize,
    /// Queue wait times.
    pub wait: Accumulator,
    /// Processing-delay spans.
    pub processing: Accumulator,
    /// Full reservation spans.
    pub delay_to_next: Accumulator,
    /// Message sizes.
    pub size: Accumulator,
    /// Bounded ring of recent step records.
    pub recent: VecDeque<MsgRecord>,
}

/// Capacity of the per-node message-history ring.
const RECENT_RING_CAPACITY: usize = 64;

impl NodeStats {
    fn push_record(&mut self, record: MsgRecord) {
        if self.recent.len() == RECENT_RING_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }
}

/// Whole-run statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Events consumed from the scheduler.
    pub total_events: u64,
    /// Message copies handed to links.
    pub messages_dispatched: u64,
    /// Arrivals delivered onto input queues.
    pub messages_delivered: u64,
    /// Copies dropped by link predicates.
    pub predicate_drops: u64,
    /// Messages that died with no matching edge.
    pub messages_terminated: u64,
    /// Virtual clock at termination, in seconds.
    pub final_simtime_secs: f64,
    /// Wall-clock duration of the run.
    pub wall_time_ms: u64,
}

/// One hop of a message's history, recorded when history is enabled.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryHop {
    /// Simtime the step started.
    pub simtime: f64,
    /// UTC rendering of the simtime.
    pub utc: String,
    /// Node that sent the message here.
    pub from: String,
    /// Node that processed it.
    pub to: String,
    /// Payload snapshot at processing time.
    pub payload: serde_json::Value,
    /// Processing span of the step.
    pub processing: f64,
    /// Full reservation span of the step.
    pub total_delay: f64,
    /// Queue wait before the step.
    pub wait: f64,
}

/// Message identity to its hop history.
pub type MsgHistory = BTreeMap<String, Vec<HistoryHop>>;

// ============================================================================
// Node Runtime
// ============================================================================

/// A live node: its behavior plus the runtime state the engine manages for
/// it (FIFO input queue, reservation flag, counters).
pub struct NodeRuntime {
    /// The built node from the scenario graph.
    pub built: BuiltNode,
    /// Messages waiting while the node is reserved.
    pub input_queue: VecDeque<Message>,
    /// Whether the node is inside a reservation window.
    pub busy: bool,
    /// Per-node counters.
    pub stats: NodeStats,
}

// ============================================================================
// Run Configuration
// ============================================================================

/// Everything a run needs besides the scenario itself.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Random seed for the engine stream.
    pub seed: u64,
    /// End of the run in simulated seconds.
    pub end_simtime: f64,
    /// UTC instant of simtime zero.
    pub epoch: Epoch,
    /// Label used in the results directory and CZML tree.
    pub network_name: String,
    /// Parent of the per-run results directory.
    pub results_root: PathBuf,
    /// Mirror the simulation log to stdout.
    pub terminal: bool,
    /// Write node statistics tables.
    pub node_stats: bool,
    /// Also write message history (implies `node_stats`).
    pub node_stats_history: bool,
    /// Dump node states before the run.
    pub initial_node_states: bool,
    /// Dump node states after the run.
    pub final_node_states: bool,
    /// Real-time pacing settings.
    pub realtime: RealTimeConfig,
    /// Worker threads for node computations; zero disables the pool.
    pub promise_threads: usize,
}

impl RunConfig {
    /// Defaults matching the CLI, anchored at the given epoch.
    pub fn new(epoch: Epoch) -> Self {
        RunConfig {
            seed: 9001,
            end_simtime: 9001.0,
            epoch,
            network_name: "Default_".to_string(),
            results_root: PathBuf::from("./Results"),
            terminal: false,
            node_stats: false,
            node_stats_history: false,
            initial_node_states: false,
            final_node_states: false,
            realtime: RealTimeConfig::default(),
            promise_threads: 0,
        }
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// The main simulation event loop.
pub struct EventLoop {
    queue: BinaryHeap<Event>,
    ctx: SimContext,
    nodes: Vec<NodeRuntime>,
    writers: OutputWriters,
    stats: SimulationStats,
    history: Option<MsgHistory>,
    realtime: RealTimeConfig,
    pool: Option<PromisePool>,
    czml_root: PathBuf,
    session_token: String,
    seed: u64,
    warned_edges: std::collections::BTreeSet<(usize, String)>,
}

impl EventLoop {
    /// Create an event loop over a built graph. Sources are bootstrapped
    /// with a wake event at simtime zero, in definition order.
    pub fn new(
        graph: bobcat_model::BuiltGraph,
        config: &RunConfig,
        results_dir: &Path,
        writers: OutputWriters,
    ) -> Self {
        let mut ctx = SimContext::new(
            config.seed,
            config.epoch,
            SimTime::from_secs(config.end_simtime),
        );
        let session_token = ctx.fresh_message_id();

        let nodes: Vec<NodeRuntime> = graph
            .nodes
            .into_iter()
            .map(|built| NodeRuntime {
                built,
                input_queue: VecDeque::new(),
                busy: false,
                stats: NodeStats::default(),
            })
            .collect();

        for (index, node) in nodes.iter().enumerate() {
            if node.built.behavior.is_source() {
                ctx.post_immediate(EventKind::Wake { node: NodeId(index) });
            }
        }

        let mut queue = BinaryHeap::new();
        for event in ctx.take_pending_events() {
            queue.push(event);
        }

        let artifact_paths = ArtifactPaths {
            results_dir: results_dir.to_path_buf(),
            network_name: config.network_name.clone(),
        };

        EventLoop {
            queue,
            ctx,
            nodes,
            writers,
            stats: SimulationStats::default(),
            history: config.node_stats_history.then(MsgHistory::new),
            realtime: config.realtime.clone(),
            pool: (config.promise_threads > 0).then(|| PromisePool::new(config.promise_threads)),
            czml_root: artifact_paths.czml_dir(),
            session_token,
            seed: config.seed,
            warned_edges: std::collections::BTreeSet::new(),
        }
    }

    /// The live nodes, in definition order.
    pub fn nodes(&self) -> &[NodeRuntime] {
        &self.nodes
    }

    /// Statistics collected so far.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Message history, when history recording is enabled.
    pub fn history(&self) -> Option<&MsgHistory> {
        self.history.as_ref()
    }

    /// Current simulation time.
    pub fn current_time(&self) -> SimTime {
        self.ctx.time()
    }

    fn percent(&self) -> f64 {
        let end = self.ctx.end_simtime().as_secs_f64();
        if end > 0.0 {
            self.ctx.time().as_secs_f64() / end * 100.0
        } else {
            0.0
        }
    }

    fn simulator_line(&mut self, text: &str) -> Result<(), RunnerError> {
        let percent = self.percent();
        let simtime = self.ctx.time().as_secs_f64();
        let utc = self.ctx.now_utc();
        let token = self.session_token.clone();
        self.writers
            .sim_line(percent, simtime, utc, "bobcat", "Simulator", &token, text)
    }

    /// Run until the configured end simtime, the queue drains, or the stop
    /// token is raised. In-flight events are never interrupted.
    pub fn run(&mut self, stop_flag: Option<Arc<AtomicBool>>) -> Result<&SimulationStats, RunnerError> {
        let start_wall = Instant::now();
        let end_time = self.ctx.end_simtime();

        self.simulator_line(&format!("Using Random seed: {}", self.seed))?;
        self.simulator_line(&format!("Loaded |{}| total nodes", self.nodes.len()))?;

        // A zero end bound terminates before anything dispatches.
        if end_time == SimTime::ZERO {
            self.simulator_line("Done.")?;
            self.writers.flush()?;
            self.stats.wall_time_ms = start_wall.elapsed().as_millis() as u64;
            return Ok(&self.stats);
        }

        // End-of-simulation sentinel: fires after every event due at the
        // same time.
        self.queue.push(Event {
            time: end_time,
            seq: u64::MAX,
            kind: EventKind::SimulationEnd,
        });

        let mut pacer = self
            .realtime
            .enabled
            .then(|| RealTimePacer::new(self.realtime.clone()));

        while let Some(event) = self.queue.pop() {
            if let Some(flag) = &stop_flag {
                if flag.load(Ordering::Relaxed) {
                    self.simulator_line("Stop requested, finishing run")?;
                    break;
                }
            }

            if matches!(event.kind, EventKind::SimulationEnd) {
                self.ctx.set_time(event.time);
                break;
            }

            if let Some(pacer) = pacer.as_mut() {
                if let Err(violation) = pacer.pace(event.time) {
                    self.simulator_line("Simulation process is too slow for real time mode. Stopping.")?;
                    self.writers.flush()?;
                    return Err(RunnerError::SimulationTooSlow {
                        behind_secs: violation.behind_secs,
                    });
                }
            }

            self.ctx.set_time(event.time);
            self.dispatch(event)?;
            for pending in self.ctx.take_pending_events() {
                self.queue.push(pending);
            }
            self.stats.total_events += 1;
        }

        self.stats.final_simtime_secs = self.ctx.time().as_secs_f64();
        self.stats.wall_time_ms = start_wall.elapsed().as_millis() as u64;
        self.simulator_line(&format!("Session token: {}", self.session_token))?;
        self.simulator_line("Done.")?;
        self.writers.flush()?;
        Ok(&self.stats)
    }

    fn dispatch(&mut self, event: Event) -> Result<(), RunnerError> {
        match event.kind {
            EventKind::Arrival { node, message } => {
                self.stats.messages_delivered += 1;
                let runtime = &mut self.nodes[node.0];
                runtime.stats.ingress += 1;
                if runtime.busy {
                    runtime.input_queue.push_back(message);
                    runtime.stats.max_queue_depth =
                        runtime.stats.max_queue_depth.max(runtime.input_queue.len());
                } else {
                    self.begin_step(node, Some(message))?;
                }
            }
            EventKind::Ready { node, outputs } => {
                self.dispatch_outputs(node, outputs)?;
                let runtime = &mut self.nodes[node.0];
                if let Some(next) = runtime.input_queue.pop_front() {
                    // Sim time does not advance between queued steps.
                    self.begin_step(node, Some(next))?;
                } else if runtime.built.behavior.is_source() && runtime.built.behavior.active() {
                    self.begin_step(node, None)?;
                } else {
                    runtime.busy = false;
                }
            }
            EventKind::Wake { node } => {
                if !self.nodes[node.0].busy {
                    self.begin_step(node, None)?;
                }
            }
            EventKind::SimulationEnd => {}
        }
        Ok(())
    }

    /// Invoke one step: run the behavior, do the bookkeeping, and schedule
    /// the ready event that ends the reservation window.
    fn begin_step(&mut self, node_id: NodeId, mut input: Option<Message>) -> Result<(), RunnerError> {
        let now = self.ctx.time();
        let now_secs = now.as_secs_f64();
        let epoch = self.ctx.epoch();
        let end_simtime = self.ctx.end_simtime();

        if let Some(message) = input.as_mut() {
            message.wait_time = now - message.time_sent;
        }

        // Split borrows: the behavior needs the engine RNG and the node's
        // own position provider at the same time.
        let ctx = &mut self.ctx;
        let runtime = &mut self.nodes[node_id.0];
        let node_name = runtime.built.name.clone();
        let node_type = runtime.built.type_name.clone();

        let step_result = {
            let behavior = &mut runtime.built.behavior;
            let mut step_ctx = StepContext {
                now,
                epoch,
                end_simtime,
                node_name: &node_name,
                rng: ctx.rng(),
                position: runtime.built.position.as_ref(),
                czml_root: Some(self.czml_root.as_path()),
                pool: self.pool.as_ref(),
            };
            behavior.step(input.clone(), &mut step_ctx)
        };

        let step = match step_result {
            Ok(step) => step,
            Err(e) => {
                let message_id = input.as_ref().map(|m| m.id.as_str()).unwrap_or("-").to_string();
                error!(
                    simtime = now_secs,
                    node = %node_name,
                    message_id = %message_id,
                    error = %e,
                    "node step failed, aborting run"
                );
                self.writers.sim_line(
                    0.0,
                    now_secs,
                    bobcat_core::utc_at(epoch, now),
                    &node_name,
                    &node_type,
                    &message_id,
                    &format!("ERROR: {e}"),
                )?;
                return Err(RunnerError::Sim(e));
            }
        };

        let processing_secs = step.processing_delay.as_secs_f64();
        let reserved = step.setup_delay + step.processing_delay;
        let reserved_secs = reserved.as_secs_f64();

        // Bookkeeping keys off the consumed input, or the first output for
        // source steps.
        let record_of = |message: &Message, time_sent: f64, wait: f64, size: f64| MsgRecord {
            id: message.id.clone(),
            time_received: time_sent,
            wait,
            delay_to_next: reserved_secs,
            processing: processing_secs,
            size,
        };
        let record = match (&input, step.outputs.first()) {
            (Some(message), _) => Some((
                record_of(
                    message,
                    message.time_sent.as_secs_f64(),
                    message.wait_time.as_secs_f64(),
                    message.size(&runtime.built.size_key),
                ),
                message.payload.clone(),
                message.last_node.clone(),
            )),
            (None, Some(first)) => Some((
                record_of(first, now_secs, 0.0, first.size(&runtime.built.size_key)),
                first.payload.clone(),
                None,
            )),
            (None, None) => None,
        };

        if let Some((record, payload, from)) = record {
            runtime.stats.processed += 1;
            runtime.stats.wait.record(record.wait);
            runtime.stats.processing.record(record.processing);
            runtime.stats.delay_to_next.record(record.delay_to_next);
            runtime.stats.size.record(record.size);
            self.writers.node_line(
                record.time_received,
                &node_name,
                &record.id,
                record.size,
                record.wait,
                record.processing,
                record.delay_to_next,
            )?;
            if let Some(history) = self.history.as_mut() {
                history.entry(record.id.clone()).or_default().push(HistoryHop {
                    simtime: now_secs,
                    utc: format_epoch(bobcat_core::utc_at(epoch, now)),
                    from: from.unwrap_or_else(|| node_name.clone()),
                    to: node_name.clone(),
                    payload: serde_json::to_value(&payload).unwrap_or_default(),
                    processing: processing_secs,
                    total_delay: reserved_secs,
                    wait: record.wait,
                });
            }
            runtime.stats.push_record(record);
        }

        let percent = if end_simtime.as_secs_f64() > 0.0 {
            now_secs / end_simtime.as_secs_f64() * 100.0
        } else {
            0.0
        };
        let utc = bobcat_core::utc_at(epoch, now);
        match &input {
            Some(message) => {
                self.writers.sim_line(
                    percent,
                    now_secs,
                    utc,
                    &node_name,
                    &node_type,
                    &message.id,
                    &format!(
                        "Data ID |{}| arrived at |{:.6}|. Reserved for |{:.6}| SimSeconds",
                        message.id, now_secs, reserved_secs
                    ),
                )?;
                if step.outputs.is_empty() {
                    self.writers.sim_line(
                        percent, now_secs, utc, &node_name, &node_type, &message.id, "Msg done.",
                    )?;
                }
            }
            None => {
                if let Some(first) = step.outputs.first() {
                    self.writers.sim_line(
                        percent,
                        now_secs,
                        utc,
                        &node_name,
                        &node_type,
                        &first.id,
                        &format!(
                            "Generated msg |{}|. Cooling down |{:.6}| SimSeconds",
                            first.id, reserved_secs
                        ),
                    )?;
                }
            }
        }

        runtime.busy = true;
        ctx.post_event(
            reserved,
            EventKind::Ready {
                node: node_id,
                outputs: step.outputs,
            },
        );
        Ok(())
    }

    /// Send one step's outputs across the node's outgoing links, in edge
    /// definition order. Each passing edge gets a deep copy of the message.
    fn dispatch_outputs(&mut self, node_id: NodeId, outputs: Vec<Message>) -> Result<(), RunnerError> {
        if outputs.is_empty() {
            return Ok(());
        }
        let now = self.ctx.time();
        let now_secs = now.as_secs_f64();
        let epoch = self.ctx.epoch();
        let end_secs = self.ctx.end_simtime().as_secs_f64();
        let node_count = self.nodes.len();

        let ctx = &mut self.ctx;
        let runtime = &mut self.nodes[node_id.0];
        let node_name = runtime.built.name.clone();
        let node_type = runtime.built.type_name.clone();
        let size_key = runtime.built.size_key.clone();

        for mut message in outputs {
            message.last_node = Some(node_name.clone());
            message.time_sent = now;
            // One draw per message dispatch, shared by every percentage
            // route so they partition.
            let draw: i64 = ctx.rng().gen_range(0..=100);
            message.payload.insert(RANDOM_ROUTER_KEY.to_string(), Value::Int(draw));

            let mut matches = 0u64;
            for link in &runtime.built.links {
                if !link.predicate.eval(now_secs, &message.payload) {
                    *runtime.stats.drops.entry(link.to_name.clone()).or_insert(0) += 1;
                    self.stats.predicate_drops += 1;
                    continue;
                }
                if link.to.0 >= node_count {
                    if self.warned_edges.insert((node_id.0, link.to_name.clone())) {
                        warn!(
                            from = %node_name,
                            to = %link.to_name,
                            "edge references a node that does not exist, message dropped"
                        );
                    }
                    continue;
                }

                let delay_secs = match &link.delay {
                    LinkDelaySpec::Constant(delay) => *delay,
                    LinkDelaySpec::SizeRate { rate_mbits_per_s } => {
                        if *rate_mbits_per_s > 0.0 {
                            message.size(&size_key) / rate_mbits_per_s
                        } else {
                            0.0
                        }
                    }
                    LinkDelaySpec::Mathis { mss, rtt, packet_loss, c_constant } => {
                        let throughput = mathis_throughput(*mss, *rtt, *packet_loss, *c_constant);
                        if throughput.is_finite() && throughput > 0.0 {
                            message.size(&size_key) / throughput
                        } else {
                            0.0
                        }
                    }
                };

                let delay = SimTime::from_secs(delay_secs);
                let mut copy = message.clone();
                // The router draw is routing state, not payload; it does not
                // travel.
                copy.payload.remove(RANDOM_ROUTER_KEY);
                copy.next_hop_delay = delay;
                ctx.post_event(
                    delay,
                    EventKind::Arrival {
                        node: link.to,
                        message: copy,
                    },
                );
                matches += 1;
            }

            runtime.stats.egress += matches;
            self.stats.messages_dispatched += matches;
            if matches == 0 {
                runtime.stats.terminated += 1;
                self.stats.messages_terminated += 1;
                let percent = if end_secs > 0.0 { now_secs / end_secs * 100.0 } else { 0.0 };
                self.writers.sim_line(
                    percent,
                    now_secs,
                    bobcat_core::utc_at(epoch, now),
                    &node_name,
                    &node_type,
                    &message.id,
                    "Msg done.",
                )?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Orchestration
// ============================================================================

/// What a finished run hands back to the embedder.
pub struct RunReport {
    /// Whole-run statistics.
    pub stats: SimulationStats,
    /// Where the artifacts landed.
    pub results_dir: PathBuf,
    /// Per-node counters, in definition order.
    pub node_stats: Vec<(String, NodeStats)>,
    /// Message hop history, when history recording was enabled.
    pub history: Option<MsgHistory>,
}

/// Load, run, and write artifacts for a scenario file.
pub fn run_scenario_file(
    path: &Path,
    config: &RunConfig,
    stop_flag: Option<Arc<AtomicBool>>,
) -> Result<RunReport, RunnerError> {
    let scenario = bobcat_model::load_scenario(path)?;
    run_scenario(&scenario, config, stop_flag)
}

/// Run an already-loaded scenario and write all configured artifacts.
pub fn run_scenario(
    scenario: &Scenario,
    config: &RunConfig,
    stop_flag: Option<Arc<AtomicBool>>,
) -> Result<RunReport, RunnerError> {
    let graph = build_graph(scenario)?;

    let results_dir = output::results_dir(&config.results_root, &config.network_name, config.epoch);
    let writers = OutputWriters::create(&results_dir, config.terminal)?;

    output::write_loaded_network(&results_dir, &scenario.to_canonical_json())?;

    let mut event_loop = EventLoop::new(graph, config, &results_dir, writers);
    output::write_loaded_node_config(&results_dir, event_loop.nodes())?;
    if config.initial_node_states {
        output::write_node_states(
            &results_dir.join("sim_initial_state.txt"),
            event_loop.stats(),
            event_loop.nodes(),
        )?;
    }

    let run_result = event_loop.run(stop_flag).map(|stats| stats.clone());

    // Stats and state artifacts stay on disk for postmortem even when the
    // run aborted.
    if config.node_stats || config.node_stats_history {
        output::write_node_stats(&results_dir, event_loop.nodes(), config.node_stats_history)?;
    }
    if let Some(history) = event_loop.history() {
        output::write_msg_history(&results_dir, history)?;
    }
    if config.final_node_states {
        output::write_node_states(
            &results_dir.join("sim_end_state.txt"),
            event_loop.stats(),
            event_loop.nodes(),
        )?;
    }

    let stats = run_result?;
    let node_stats = event_loop
        .nodes()
        .iter()
        .map(|node| (node.built.name.clone(), node.stats.clone()))
        .collect();

    Ok(RunReport {
        stats,
        results_dir,
        node_stats,
        history: event_loop.history().cloned(),
    })
}
