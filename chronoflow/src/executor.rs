//! The graph executor: the outer drive loop around one root graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builder::{BuildEnv, GraphBuilder};
use crate::error::Result;
use crate::events::ObserverRegistry;
use crate::graph::Graph;
use crate::node::NodeId;
use crate::push::{PushSender, WakeSignal};
use crate::time::EngineTime;

/// How engine time relates to the wall clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Jump straight to the next scheduled time.
    Simulation,
    /// Sleep until the wall clock reaches the next scheduled time; push
    /// arrivals cut the sleep short.
    RealTime,
}

/// Execution parameters of one run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// First engine time of the run.
    pub start_time: EngineTime,
    /// Last engine time of the run, inclusive.
    pub end_time: EngineTime,
    /// Clock mode.
    pub run_mode: RunMode,
    /// How long an idle real-time engine parks before re-polling.
    pub idle_park: Duration,
}

impl ExecutionConfig {
    /// A simulation run over `[start, end]`.
    pub fn simulation(start_time: EngineTime, end_time: EngineTime) -> Self {
        ExecutionConfig {
            start_time,
            end_time,
            run_mode: RunMode::Simulation,
            idle_park: Duration::from_millis(50),
        }
    }

    /// A real-time run over `[start, end]`.
    pub fn real_time(start_time: EngineTime, end_time: EngineTime) -> Self {
        ExecutionConfig {
            run_mode: RunMode::RealTime,
            ..ExecutionConfig::simulation(start_time, end_time)
        }
    }

    /// Overrides the idle park interval.
    pub fn with_idle_park(mut self, idle_park: Duration) -> Self {
        self.idle_park = idle_park;
        self
    }
}

/// Requests a running executor to stop, from any thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    wake: Arc<WakeSignal>,
}

impl StopHandle {
    /// Sets the stop flag and wakes a sleeping engine. Observed at tick
    /// boundaries and between node evaluations within a tick.
    pub fn request_engine_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.wake.buzz();
    }
}

/// Drives one root graph from start to end time, dispatching life-cycle
/// callbacks and owning the clock.
pub struct GraphExecutor {
    graph: Graph,
    config: ExecutionConfig,
}

impl GraphExecutor {
    /// Builds the root graph and wraps it in an executor.
    pub fn new(builder: &GraphBuilder, config: ExecutionConfig) -> Result<Self> {
        let graph = builder.build(BuildEnv::root())?;
        Ok(GraphExecutor { graph, config })
    }

    /// Wraps an already built root graph.
    pub fn from_graph(graph: Graph, config: ExecutionConfig) -> Self {
        GraphExecutor { graph, config }
    }

    /// The root graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The root graph, mutably.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Life-cycle observers of this run.
    pub fn observers(&self) -> ObserverRegistry {
        self.graph.core.observers.clone()
    }

    /// A cross-thread stop handle.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.graph.core.stop_flag),
            wake: Arc::clone(&self.graph.core.wake),
        }
    }

    /// A producer handle into the push-source node at `node`.
    pub fn push_sender(&self, node: usize) -> Option<PushSender> {
        let id = NodeId::from_raw(node);
        let mut body = self.graph.bodies.get(id)?.borrow_mut();
        body.push_queue().map(|queue| queue.sender())
    }

    /// Runs the graph from `start_time` through `end_time`: starts all
    /// nodes, advances engine time tick by tick, then stops all nodes in
    /// reverse order and tears the graph down.
    pub fn run(&mut self) -> Result<()> {
        let ExecutionConfig {
            start_time,
            end_time,
            run_mode,
            idle_park,
        } = self.config;

        self.graph.start(start_time)?;
        let mut after = start_time;

        let outcome = loop {
            if self.graph.core.stop_requested() {
                break Ok(());
            }
            let next = match self.graph.next_time(after) {
                Ok(next) => next,
                Err(error) => break Err(error),
            };
            let Some(when) = next else {
                match run_mode {
                    // Nothing scheduled and nothing can arrive: done.
                    RunMode::Simulation => break Ok(()),
                    // Park until a producer buzzes or a stop arrives.
                    RunMode::RealTime => {
                        if EngineTime::wall_clock() > end_time {
                            break Ok(());
                        }
                        self.graph.core.wake.wait(idle_park);
                        continue;
                    }
                }
            };
            if when > end_time {
                break Ok(());
            }
            if run_mode == RunMode::RealTime && !self.sleep_until(when) {
                // Woken early: a push may have scheduled something sooner.
                continue;
            }
            if let Err(error) = self.graph.evaluate_tick(when) {
                break Err(error);
            }
            after = when.next();
        };

        // Unwind: stop in reverse index order and tear down, even when the
        // loop broke with an error.
        let stop_outcome = self.graph.stop().and_then(|()| self.graph.dispose());
        self.graph.core.observers.flush();
        outcome.and(stop_outcome)
    }

    /// Sleeps until the wall clock reaches `when`. Returns false when the
    /// sleep was cut short by a wake or stop request.
    fn sleep_until(&self, when: EngineTime) -> bool {
        loop {
            if self.graph.core.stop_requested() {
                return false;
            }
            let wall = EngineTime::wall_clock();
            let Some(gap) = wall.until(when) else {
                return true;
            };
            let slice = gap.min(self.config.idle_park);
            if self.graph.core.wake.wait(slice) {
                return false;
            }
        }
    }
}
