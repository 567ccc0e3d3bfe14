//! Run artifacts: the results directory, per-event log, node log, stats
//! tables, message history, and state dumps.

use crate::{MsgHistory, NodeRuntime, RunnerError, SimulationStats};
use bobcat_core::{format_epoch, Epoch};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Results directory for a run: `<root>/<network_name><start_iso>` with
/// colons turned into dashes and dots into underscores.
pub fn results_dir(root: &Path, network_name: &str, epoch: Epoch) -> PathBuf {
    let start_iso = format_epoch(epoch);
    let start_iso = start_iso.trim_end_matches('Z').replace(':', "-").replace('.', "_");
    root.join(format!("{network_name}{start_iso}"))
}

/// Open writers for the files that stream during the run.
pub struct OutputWriters {
    sim_log: BufWriter<File>,
    node_log: BufWriter<File>,
    terminal: bool,
}

impl OutputWriters {
    /// Create `simulation.log` and `node_log.txt` under the results
    /// directory. With `terminal` set, simulation log lines also go to
    /// stdout.
    pub fn create(results_dir: &Path, terminal: bool) -> Result<Self, RunnerError> {
        std::fs::create_dir_all(results_dir)?;
        let sim_log = BufWriter::new(File::create(results_dir.join("simulation.log"))?);
        let mut node_log = BufWriter::new(File::create(results_dir.join("node_log.txt"))?);
        writeln!(
            node_log,
            "SimTime\tNode\tData_ID\tData_Size\tWait_time\tProcessing_time\tDelay_to_Next"
        )?;
        Ok(OutputWriters {
            sim_log,
            node_log,
            terminal,
        })
    }

    /// One human-readable simulation log line, in the shared prefix format
    /// `pct%|simtime|utc|node|[type]|id|text`.
    pub fn sim_line(
        &mut self,
        percent: f64,
        simtime: f64,
        utc: Epoch,
        node: &str,
        node_type: &str,
        id: &str,
        text: &str,
    ) -> Result<(), RunnerError> {
        let line = format!(
            "{:4.1}%|{:8.2}|{}|{:^20}|[{:^15}]|{}|{}",
            percent,
            simtime,
            format_epoch(utc),
            node,
            node_type,
            id,
            text
        );
        writeln!(self.sim_log, "{line}")?;
        if self.terminal {
            println!("{line}");
        }
        Ok(())
    }

    /// One tab-separated node log record.
    #[allow(clippy::too_many_arguments)]
    pub fn node_line(
        &mut self,
        time_sent: f64,
        node: &str,
        data_id: &str,
        data_size: f64,
        wait_time: f64,
        processing_time: f64,
        delay_to_next: f64,
    ) -> Result<(), RunnerError> {
        writeln!(
            self.node_log,
            "{time_sent}\t{node}\t{data_id}\t{data_size}\t{wait_time}\t{processing_time}\t{delay_to_next}"
        )?;
        Ok(())
    }

    /// Flush both streams.
    pub fn flush(&mut self) -> Result<(), RunnerError> {
        self.sim_log.flush()?;
        self.node_log.flush()?;
        Ok(())
    }
}

/// `loaded_network.json`: the canonical resolved graph.
pub fn write_loaded_network(
    results_dir: &Path,
    canonical: &serde_json::Value,
) -> Result<(), RunnerError> {
    let text = serde_json::to_string_pretty(canonical)?;
    std::fs::write(results_dir.join("loaded_network.json"), text)?;
    Ok(())
}

/// `loaded_node_config.txt`: one block per node with its resolved options
/// and links, so an analyst can catch spelling mistakes.
pub fn write_loaded_node_config(
    results_dir: &Path,
    nodes: &[NodeRuntime],
) -> Result<(), RunnerError> {
    let mut out = BufWriter::new(File::create(results_dir.join("loaded_node_config.txt"))?);
    for node in nodes {
        writeln!(out, "Node: {}", node.built.name)?;
        writeln!(out, "    type: {}", node.built.type_name)?;
        if let Some(meta) = &node.built.meta_name {
            writeln!(out, "    meta_node: {meta}")?;
        }
        for (key, value) in &node.built.options.0 {
            writeln!(out, "    {key}: {}", value.render())?;
        }
        for link in &node.built.links {
            writeln!(
                out,
                "    -> {} [{}] {:?}",
                link.to_name,
                link.predicate.source(),
                link.delay
            )?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// `node_stats.txt` (per-node summary tables, plus recent history when
/// enabled) and `node_stats_total.txt` (one counter row per node).
pub fn write_node_stats(
    results_dir: &Path,
    nodes: &[NodeRuntime],
    write_history: bool,
) -> Result<(), RunnerError> {
    let mut stats_out = BufWriter::new(File::create(results_dir.join("node_stats.txt"))?);
    let mut total_out = BufWriter::new(File::create(results_dir.join("node_stats_total.txt"))?);

    writeln!(
        total_out,
        "{:<24}{:>10}{:>10}{:>10}{:>10}{:>12}{:>16}",
        "Node", "ingress", "steps", "egress", "drops", "terminated", "max_queue_depth"
    )?;

    for node in nodes {
        let stats = &node.stats;
        writeln!(stats_out, "\n\nNode: {}", node.built.name)?;
        writeln!(
            stats_out,
            "{:<10}{:>16}{:>18}{:>16}{:>16}",
            "", "msg_wait_time", "processing_time", "delay_to_next", "data_size"
        )?;
        for (label, pick) in [
            ("count", 0usize),
            ("mean", 1),
            ("std", 2),
            ("min", 3),
            ("max", 4),
            ("sum", 5),
        ] {
            let cell = |acc: &crate::Accumulator| -> String {
                let value = match pick {
                    0 => acc.count as f64,
                    1 => acc.mean(),
                    2 => acc.std(),
                    3 => acc.min,
                    4 => acc.max,
                    _ => acc.sum,
                };
                if acc.count == 0 && pick != 0 {
                    "-".to_string()
                } else {
                    format!("{value:.6}")
                }
            };
            writeln!(
                stats_out,
                "{:<10}{:>16}{:>18}{:>16}{:>16}",
                label,
                cell(&stats.wait),
                cell(&stats.processing),
                cell(&stats.delay_to_next),
                cell(&stats.size)
            )?;
        }

        if write_history {
            writeln!(stats_out, "Node History")?;
            writeln!(
                stats_out,
                "{:<40}{:>12}{:>14}{:>20}{:>18}{:>12}",
                "UUID", "Sim_time", "msg_wait_time", "delay_till_next_msg", "processing_time", "data_size"
            )?;
            for record in &stats.recent {
                writeln!(
                    stats_out,
                    "{:<40}{:>12.4}{:>14.4}{:>20.4}{:>18.4}{:>12.4}",
                    record.id,
                    record.time_received,
                    record.wait,
                    record.delay_to_next,
                    record.processing,
                    record.size
                )?;
            }
        }

        let total_drops: u64 = stats.drops.values().sum();
        writeln!(
            total_out,
            "{:<24}{:>10}{:>10}{:>10}{:>10}{:>12}{:>16}",
            node.built.name,
            stats.ingress,
            stats.processed,
            stats.egress,
            total_drops,
            stats.terminated,
            stats.max_queue_depth
        )?;
    }

    stats_out.flush()?;
    total_out.flush()?;
    Ok(())
}

/// `msg_history.txt` and `msg_history.csv`: every hop of every message.
pub fn write_msg_history(results_dir: &Path, history: &MsgHistory) -> Result<(), RunnerError> {
    let mut txt = BufWriter::new(File::create(results_dir.join("msg_history.txt"))?);
    writeln!(txt, "\n\nMsg History")?;
    for (id, hops) in history {
        writeln!(txt, "\nMsg: {id}")?;
        for hop in hops {
            writeln!(
                txt,
                "{:.6} {} -- {} -- {} --> {} {}",
                hop.simtime, hop.utc, hop.from, hop.processing, hop.to, hop.payload
            )?;
        }
    }
    txt.flush()?;

    let mut csv = BufWriter::new(File::create(results_dir.join("msg_history.csv"))?);
    writeln!(csv, "id,msg_wait,simtime,datetime,processing,delay,origin,destination,data")?;
    for (id, hops) in history {
        for hop in hops {
            writeln!(
                csv,
                "{},{},{},{},{},{},{},{},{}",
                id,
                hop.wait,
                hop.simtime,
                hop.utc,
                hop.processing,
                hop.total_delay - hop.processing,
                hop.from,
                hop.to,
                serde_json::to_string(&hop.payload).unwrap_or_default()
            )?;
        }
    }
    csv.flush()?;
    Ok(())
}

/// `sim_end_state.txt` (or the initial flavor): run parameters plus each
/// node's internal state.
pub fn write_node_states(
    path: &Path,
    stats: &SimulationStats,
    nodes: &[NodeRuntime],
) -> Result<(), RunnerError> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "simtime: {:.6}", stats.final_simtime_secs)?;
    writeln!(out, "events: {}", stats.total_events)?;
    writeln!(out, "\nNode Configuration")?;
    for node in nodes {
        writeln!(
            out,
            "{} [{}] queue_depth={} busy={} {}",
            node.built.name,
            node.built.type_name,
            node.input_queue.len(),
            node.busy,
            node.built.behavior.state_summary()
        )?;
    }
    out.flush()?;
    Ok(())
}
