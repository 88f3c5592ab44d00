use crate::advice::Advice;
use crate::agents::agent::PatternAgent;
use crate::agents::error_agent::ErrorAgent;
use crate::agents::performance_agent::PerformanceAgent;
use crate::agents::scoring::PriorityScorer;
use crate::config::Config;
use crate::error::AgentError;
use crate::events::LogEntry;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of running every registered agent over one batch
#[derive(Debug, Default)]
pub struct BatchAnalysis {
    /// Scored advisories, unique by id, highest priority first
    pub advice: Vec<Advice>,
    /// Agents that failed, panicked, or missed the deadline
    pub failures: Vec<AgentError>,
    pub elapsed: Duration,
}

/// A registered agent and whether a run of it is still executing
struct AgentSlot {
    agent: Arc<dyn PatternAgent>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the agent thread finishes or unwinds
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs pattern agents concurrently over a batch and merges their output
///
/// Each agent gets its own thread and shares the batch through an `Arc`.
/// All agents share one deadline; an agent that misses it is reported as a
/// timeout and anything it produces afterwards is discarded. An agent whose
/// previous run is still executing is not started again and counts as a
/// timeout for the batch, so at most one thread per agent is ever alive.
/// A failing or panicking agent never affects the results of the others.
pub struct AgentManager {
    agents: Vec<AgentSlot>,
    scorer: PriorityScorer,
    timeout: Duration,
}

impl AgentManager {
    pub fn new(scorer: PriorityScorer, timeout: Duration) -> Self {
        Self {
            agents: Vec::new(),
            scorer,
            timeout,
        }
    }

    /// Manager with the built-in error and performance agents
    pub fn from_config(config: &Config) -> Self {
        let mut manager = Self::new(
            PriorityScorer::new(config.scoring.clone()),
            config.processing.agent_timeout(),
        );
        manager.register(Arc::new(ErrorAgent::new(config.agents.error.clone())));
        manager.register(Arc::new(PerformanceAgent::new(
            config.agents.performance.clone(),
        )));
        manager
    }

    /// Add an agent, replacing any agent already registered under its name
    pub fn register(&mut self, agent: Arc<dyn PatternAgent>) {
        let slot = AgentSlot {
            agent,
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        let name = slot.agent.name().to_string();
        if let Some(existing) = self.agents.iter_mut().find(|s| s.agent.name() == name) {
            warn!("Replacing already registered agent '{}'", name);
            *existing = slot;
        } else {
            self.agents.push(slot);
        }
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents
            .iter()
            .map(|s| s.agent.name().to_string())
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Run all agents over `batch`, then score, deduplicate, and rank
    ///
    /// When two agents emit the same advice id, the higher-scored one is
    /// kept. Ties in score keep the earlier agent's advisory.
    pub fn analyze(&self, batch: Vec<LogEntry>) -> BatchAnalysis {
        let started = Instant::now();
        let mut analysis = BatchAnalysis::default();

        if batch.is_empty() || self.agents.is_empty() {
            analysis.elapsed = started.elapsed();
            return analysis;
        }

        let batch = Arc::new(batch);
        let deadline = started + self.timeout;

        let mut pending = Vec::with_capacity(self.agents.len());
        for slot in &self.agents {
            let name = slot.agent.name().to_string();

            if slot.in_flight.swap(true, Ordering::AcqRel) {
                warn!("Agent '{}' is still running a previous batch, skipping it", name);
                analysis.failures.push(AgentError::Timeout {
                    agent: name,
                    timeout: self.timeout,
                });
                continue;
            }

            let (tx, rx) = mpsc::channel();
            let worker_agent = Arc::clone(&slot.agent);
            let worker_batch = Arc::clone(&batch);
            let busy = InFlight(Arc::clone(&slot.in_flight));

            let spawned = thread::Builder::new()
                .name(format!("agent-{}", name))
                .spawn(move || {
                    let result = worker_agent.analyze(&worker_batch);
                    drop(busy);
                    // The receiver may be gone after a timeout
                    let _ = tx.send(result);
                });

            match spawned {
                Ok(_) => pending.push((slot, rx)),
                Err(source) => {
                    // The closure, and with it the guard, was dropped unrun
                    analysis.failures.push(AgentError::Spawn {
                        agent: name,
                        source,
                    })
                }
            }
        }

        let mut raw = Vec::new();
        for (slot, rx) in pending {
            let name = slot.agent.name().to_string();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Ok(advice)) => {
                    debug!("Agent '{}' produced {} advisories", name, advice.len());
                    slot.agent.record_accepted(&advice);
                    raw.extend(advice);
                }
                Ok(Err(e)) => {
                    warn!("Agent '{}' failed: {}", name, e);
                    analysis.failures.push(e);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Agent '{}' missed the {:?} deadline, discarding its results",
                        name, self.timeout
                    );
                    analysis.failures.push(AgentError::Timeout {
                        agent: name,
                        timeout: self.timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Agent '{}' panicked", name);
                    analysis.failures.push(AgentError::Panicked { agent: name });
                }
            }
        }

        analysis.advice = self.rank(raw);
        analysis.elapsed = started.elapsed();
        analysis
    }

    fn rank(&self, raw: Vec<Advice>) -> Vec<Advice> {
        let mut by_id: HashMap<String, Advice> = HashMap::with_capacity(raw.len());
        let mut order = Vec::new();

        for mut advice in raw {
            self.scorer.apply(&mut advice);
            match by_id.get(&advice.advice_id) {
                Some(existing) if existing.priority_score >= advice.priority_score => {}
                Some(_) => {
                    by_id.insert(advice.advice_id.clone(), advice);
                }
                None => {
                    order.push(advice.advice_id.clone());
                    by_id.insert(advice.advice_id.clone(), advice);
                }
            }
        }

        let mut ranked: Vec<Advice> = order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect();
        ranked.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
        ranked
    }
}
