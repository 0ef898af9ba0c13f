use std::net::{IpAddr, SocketAddr};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{error, info};
use rand::Rng;
use rand_mt::Mt64;

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::flow::{FlowReplayer, FlowReport};
use crate::mix::MixDistribution;
use crate::plan::{format_slot, SlotPlan, SlotPlanEntry};
use crate::schedule::{start_index, CycleSchedule};
use crate::shutdown::Shutdown;
use crate::trace::AppCatalog;

/// Totals over every slot that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub slots_completed: usize,
    pub flows_started: usize,
    pub flows_failed: usize,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
    pub interrupted: bool,
}

impl RunSummary {
    fn absorb(&mut self, report: &FlowReport) {
        self.packets_sent += report.packets_sent;
        self.bytes_sent += report.bytes_sent;
        self.send_errors += report.send_errors;
    }
}

/// What happened in a single slot.
#[derive(Debug, Clone, Default)]
pub struct SlotOutcome {
    pub reports: Vec<FlowReport>,
    pub failed: usize,
}

/// Runs a slot plan, one barrier-separated batch of flows per slot.
pub struct Orchestrator {
    tag: &'static str,
    destination: SocketAddr,
    source_ip: IpAddr,
    base_port: u16,
    multiplex: bool,
    seed: Option<u64>,
    catalog: AppCatalog,
    mix: MixDistribution,
    shutdown: Shutdown,
}

impl Orchestrator {
    pub fn new(
        config: &GeneratorConfig,
        catalog: AppCatalog,
        mix: MixDistribution,
        shutdown: Shutdown,
    ) -> Self {
        Orchestrator {
            tag: config.direction.tag(),
            destination: config.destination,
            source_ip: config.source_ip,
            base_port: config.base_port,
            multiplex: config.multiplex,
            seed: config.seed,
            catalog,
            mix,
            shutdown,
        }
    }

    /// Loads traces, the mix and the slot plan. Any configuration problem is
    /// reported here, before a single flow exists.
    pub fn prepare(config: &GeneratorConfig, shutdown: Shutdown) -> Result<(Self, SlotPlan)> {
        config.validate()?;
        let tag = config.direction.tag();
        let catalog = AppCatalog::load(&config.traces, tag)?;
        let mix = MixDistribution::validated(&config.app_mix, &catalog)?;
        let plan = SlotPlan::load(&config.schedule, config.slot_minutes, config.num_days)?;

        info!(
            "[{} SCHEDULE] {} slots, total ≈ {} minutes",
            tag,
            plan.len(),
            plan.total_minutes()
        );
        info!("[{} MIX] {}", tag, mix.describe());
        info!(
            "[{} MODE] multiplexing={}",
            tag,
            if config.multiplex { "ON" } else { "OFF" }
        );

        Ok((Orchestrator::new(config, catalog, mix, shutdown), plan))
    }

    pub fn catalog(&self) -> &AppCatalog {
        &self.catalog
    }

    pub fn mix(&self) -> &MixDistribution {
        &self.mix
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn run(&self, plan: &SlotPlan) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut cumulative_secs = 0;

        for (idx, entry) in plan.entries().iter().enumerate() {
            if self.shutdown.is_triggered() {
                break;
            }
            info!(
                "[{} SLOT {}] window={}–{} min | duration={} | flows={}",
                self.tag,
                idx + 1,
                cumulative_secs / 60,
                (cumulative_secs + entry.duration_secs) / 60,
                format_slot(entry.duration_secs),
                entry.flow_count
            );

            let outcome = self.run_slot(idx, entry);
            summary.flows_started += outcome.reports.len() + outcome.failed;
            summary.flows_failed += outcome.failed;
            outcome.reports.iter().for_each(|r| summary.absorb(r));

            if self.shutdown.is_triggered() {
                break;
            }
            summary.slots_completed += 1;
            cumulative_secs += entry.duration_secs;
        }

        summary.interrupted = self.shutdown.is_triggered();
        if summary.interrupted {
            info!(
                "[{} MULTI] Interrupted after {} slots. Sent {} packets.",
                self.tag, summary.slots_completed, summary.packets_sent
            );
        } else {
            info!(
                "[{} MULTI] All slots completed. Sent {} packets.",
                self.tag, summary.packets_sent
            );
        }
        summary
    }

    /// Picks an app and a start sample for each of the slot's flows.
    pub fn assign_flows<R: Rng>(&self, entry: &SlotPlanEntry, rng: &mut R) -> Vec<FlowReplayer> {
        let n = entry.flow_count;
        (0..n)
            .filter_map(|i| {
                let app = self.mix.choose(rng);
                let trace = self.catalog.get(app)?;
                let start = start_index(i, n, trace.len(), self.multiplex);
                let schedule = CycleSchedule::compile(trace, start);
                Some(FlowReplayer::new(i, app, schedule, entry.duration()))
            })
            .collect()
    }

    /// Runs one slot and returns once every flow in it has stopped.
    pub fn run_slot(&self, idx: usize, entry: &SlotPlanEntry) -> SlotOutcome {
        if entry.flow_count == 0 {
            self.shutdown.sleep(entry.duration());
            return SlotOutcome::default();
        }

        let mut rng = match self.seed {
            Some(seed) => Mt64::new(seed.wrapping_add(idx as u64)),
            None => Mt64::new(rand::thread_rng().gen::<u64>()),
        };
        let flows = self.assign_flows(entry, &mut rng);

        let mut outcome = SlotOutcome::default();
        let slot_start = Instant::now();
        let handles: Vec<(usize, JoinHandle<Option<FlowReport>>)> = flows
            .into_iter()
            .filter_map(|flow| {
                let id = flow.flow_id();
                match self.spawn_flow(flow) {
                    Ok(handle) => Some((id, handle)),
                    Err(e) => {
                        error!("[{} FLOW {}] could not start thread: {}", self.tag, id, e);
                        outcome.failed += 1;
                        None
                    }
                }
            })
            .collect();

        for (id, handle) in handles {
            match handle.join() {
                Ok(Some(report)) => outcome.reports.push(report),
                Ok(None) => outcome.failed += 1,
                Err(_) => {
                    error!("[{} FLOW {}] panicked", self.tag, id);
                    outcome.failed += 1;
                }
            }
        }

        // Keep later slots aligned when every flow failed early.
        if let Some(rest) = entry.duration().checked_sub(slot_start.elapsed()) {
            if outcome.reports.is_empty() {
                self.shutdown.sleep(rest);
            }
        }
        outcome
    }

    fn spawn_flow(&self, flow: FlowReplayer) -> std::io::Result<JoinHandle<Option<FlowReport>>> {
        let tag = self.tag;
        let dest = self.destination;
        let source_ip = self.source_ip;
        let base_port = self.base_port;
        let shutdown = self.shutdown.clone();
        thread::Builder::new()
            .name(format!("flow-{}", flow.flow_id()))
            .spawn(move || {
                let id = flow.flow_id();
                match flow.bind(source_ip, base_port) {
                    Ok(bound) => Some(bound.run(dest, &shutdown, tag)),
                    Err(e) => {
                        error!("[{} FLOW {}] {}", tag, id, e);
                        None
                    }
                }
            })
    }
}
