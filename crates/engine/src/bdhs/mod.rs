// Heapscope - Heap Origin Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Breakpoint-driven heap search (BDHS).
//!
//! A run arms a capture breakpoint on every `click` listener. Once the user clicks, the
//! debuggee is stepped out frame by frame; at every pause the heap is searched for the target.
//! The run ends when the target appears and then either vanishes or persists past the
//! tolerance window, or when the debuggee stays idle for a few ticks. The result names the code
//! locations around the first appearance.
//!
//! The whole run is one task owning all run state. Pause events, interval ticks and abort
//! requests are multiplexed in a single `select!`, abort first, so pauses are handled strictly
//! one after another.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use heapscope_common::BdhsConfig;
use serde::{Serialize, Serializer};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    Debugger, DebuggerEvent, HeapscopeError, PausedEvent, ProtocolEvent, Result, SearchResultItem,
    Transport,
};

mod handlers;
mod result;
mod tracker;

pub use handlers::*;
pub use result::*;
pub use tracker::*;

/// Heap search run at every pause.
pub type BdhsSearch = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<SearchResultItem>>> + Send + Sync>;

/// Parameters of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BdhsOptions {
    /// History entries reported before the first match
    pub tolerance_before: usize,
    /// Steps the target may persist after its first appearance
    pub tolerance_after: usize,
    /// Pause budget
    pub max_steps: usize,
    /// Idle check period
    pub tick_interval: Duration,
    /// Idle ticks before the run stops on its own
    pub idle_tick_limit: usize,
}

impl Default for BdhsOptions {
    fn default() -> Self {
        Self::from(&BdhsConfig::default())
    }
}

impl From<&BdhsConfig> for BdhsOptions {
    fn from(config: &BdhsConfig) -> Self {
        Self {
            tolerance_before: config.tolerance_before,
            tolerance_after: config.tolerance_after,
            max_steps: config.max_steps,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            idle_tick_limit: config.idle_tick_limit,
        }
    }
}

/// State of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BdhsState {
    /// Waiting for the next pause
    Idle,
    /// Waiting for the first click
    Armed,
    /// Handling a pause
    Running,
    /// Finished with a result
    Found,
    /// Finished without a result
    NotFound,
    /// Stopped on request
    Aborted,
    /// Stopped by a failure
    Error,
}

/// Notifications emitted while a run progresses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BdhsSignal {
    /// The click breakpoint is installed
    Armed,
    /// The first pause arrived
    Started,
    /// A pause was handled
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Current step
        step: usize,
        /// The target appeared at this step
        match_found: bool,
        /// The tolerance window is filling up
        finalising: bool,
    },
    /// The origin was located
    Found(BdhsResult),
    /// The run went idle without ever seeing the target
    NotFound,
    /// The run was aborted
    Aborted,
    /// The pause budget ran out
    MaxStepsExceeded {
        /// Step at which the budget ran out
        step: usize,
    },
    /// A pause handler failed
    Failed {
        /// Failure description
        message: String,
    },
    /// The run is over; always the last signal
    Completed {
        /// Wall time of the run
        #[serde(serialize_with = "serialize_millis")]
        elapsed: Duration,
    },
}

fn serialize_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Terminal outcome of a run that did not fail.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum BdhsOutcome {
    /// The origin was located
    Found(BdhsResult),
    /// The target never showed up
    NotFound,
    /// The run was aborted
    Aborted,
}

/// Handle on a running BDHS task.
#[derive(Debug)]
pub struct BdhsHandle {
    abort: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<BdhsOutcome>>,
}

impl BdhsHandle {
    /// Requests an abort, effective at the next loop turn. Returns `false` if the run is over or
    /// an abort was already requested.
    pub fn abort(&mut self) -> bool {
        self.abort.take().is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Whether the run task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to end.
    pub async fn wait(self) -> Result<BdhsOutcome> {
        self.task.await.map_err(|e| HeapscopeError::HandlerFault(format!("BDHS task ended abnormally: {e}")))?
    }
}

/// Starts BDHS runs against a debugger.
pub struct BdhsExecutor<T: Transport> {
    debugger: Arc<Debugger<T>>,
    options: BdhsOptions,
    search: BdhsSearch,
}

impl<T: Transport> BdhsExecutor<T> {
    /// Creates an executor. `search` is awaited at every handled pause.
    pub fn new(debugger: Arc<Debugger<T>>, options: BdhsOptions, search: BdhsSearch) -> Self {
        Self { debugger, options, search }
    }

    /// Arms the click breakpoint and spawns the run loop.
    ///
    /// Fails when the debugger is already enabled or the breakpoint cannot be installed.
    pub async fn start(self) -> Result<(BdhsHandle, mpsc::UnboundedReceiver<BdhsSignal>)> {
        let (pause_tx, pause_rx) = mpsc::unbounded_channel();
        self.debugger.on(DebuggerEvent::Paused, pause_tx)?;

        if let Err(e) = self.debugger.set_dom_click_breakpoint(true).await {
            if let Err(disable) = self.debugger.disable().await {
                warn!("Failed to disable debugger after arming failure: {disable}");
            }
            self.debugger.off(DebuggerEvent::Paused)?;
            return Err(e);
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = oneshot::channel();

        let run = RunLoop {
            tracker: StepTracker::new(
                self.options.tolerance_before,
                self.options.tolerance_after,
                self.options.max_steps,
                self.options.idle_tick_limit,
            ),
            debugger: self.debugger,
            search: self.search,
            state: BdhsState::Armed,
            breakpoint_id: None,
            signals: signal_tx,
            tick_interval: self.options.tick_interval,
        };
        run.emit(BdhsSignal::Armed);
        info!("BDHS armed, waiting for a click");

        let task = tokio::spawn(run.run(pause_rx, abort_rx));
        Ok((BdhsHandle { abort: Some(abort_tx), task }, signal_rx))
    }
}

enum Flow {
    Continue,
    Finish(Result<BdhsOutcome>),
}

struct RunLoop<T: Transport> {
    debugger: Arc<Debugger<T>>,
    search: BdhsSearch,
    tracker: StepTracker,
    state: BdhsState,
    breakpoint_id: Option<String>,
    signals: mpsc::UnboundedSender<BdhsSignal>,
    tick_interval: Duration,
}

impl<T: Transport> RunLoop<T> {
    async fn run(
        mut self,
        mut pauses: mpsc::UnboundedReceiver<ProtocolEvent>,
        mut abort: oneshot::Receiver<()>,
    ) -> Result<BdhsOutcome> {
        let started = Instant::now();
        let mut ticker = time::interval_at(started + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut abort_open = true;

        let outcome = loop {
            let flow = tokio::select! {
                biased;
                request = &mut abort, if abort_open => {
                    abort_open = false;
                    match request {
                        Ok(()) => Ok(self.abort().await),
                        // Handle dropped: the run goes on unattended.
                        Err(_) => continue,
                    }
                }
                Some(event) = pauses.recv() => self.on_paused(event).await,
                _ = ticker.tick() => self.on_tick().await,
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finish(outcome)) => break outcome,
                Err(e) => {
                    self.fail(&e, &mut pauses);
                    break Err(e);
                }
            }
        };

        self.complete(started).await;
        outcome
    }

    async fn on_paused(&mut self, event: ProtocolEvent) -> Result<Flow> {
        let paused: PausedEvent = serde_json::from_value(event.params)
            .map_err(|e| HeapscopeError::HandlerFault(format!("malformed pause event: {e}")))?;
        let step = self.tracker.on_pause();
        debug!(step, state = ?self.state, reason = %paused.reason, "Handling pause");

        if self.state == BdhsState::Armed {
            self.emit(BdhsSignal::Started);
            self.state = BdhsState::Idle;
            self.debugger.set_dom_click_breakpoint(false).await?;

            if let Some(frame) = paused.call_frames.first() {
                if let Some(handler) = resolve_click_handler(&self.debugger, &frame.call_frame_id).await? {
                    info!(step, "Jumping to framework click handler");
                    self.breakpoint_id = Some(self.debugger.set_breakpoint_on_function_call(&handler).await?);
                    self.debugger.resume().await?;
                    return Ok(Flow::Continue);
                }
            }
        }

        self.state = BdhsState::Running;
        if self.tracker.budget_exceeded() {
            self.state = BdhsState::Error;
            warn!(step, max_steps = self.tracker.max_steps(), "BDHS step budget exceeded");
            self.emit(BdhsSignal::MaxStepsExceeded { step });
            return Ok(Flow::Finish(Err(HeapscopeError::StepBudgetExceeded {
                step,
                max_steps: self.tracker.max_steps(),
            })));
        }

        let matches = (self.search)().await?;
        match self.tracker.record(paused.call_frames, matches) {
            StepVerdict::Found => self.found().await,
            StepVerdict::Continue { match_found, finalising } => {
                self.emit(BdhsSignal::Progress { step, match_found, finalising });
                self.state = BdhsState::Idle;
                self.debugger.step_out().await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_tick(&mut self) -> Result<Flow> {
        if !self.tracker.tick(self.state == BdhsState::Idle) {
            return Ok(Flow::Continue);
        }

        info!(step = self.tracker.step(), "Debuggee idle, running a final search");
        let matches = (self.search)().await?;
        if matches.is_empty() {
            self.state = BdhsState::NotFound;
            self.emit(BdhsSignal::NotFound);
            Ok(Flow::Finish(Ok(BdhsOutcome::NotFound)))
        } else {
            self.found().await
        }
    }

    async fn found(&mut self) -> Result<Flow> {
        self.state = BdhsState::Found;
        let result = assemble_result(&self.debugger, &self.tracker).await;
        info!(step = self.tracker.step(), frames = result.frames.len(), "BDHS located the origin");
        self.emit(BdhsSignal::Found(result.clone()));
        Ok(Flow::Finish(Ok(BdhsOutcome::Found(result))))
    }

    async fn abort(&mut self) -> Flow {
        self.state = BdhsState::Aborted;
        if let Err(e) = self.debugger.resume().await {
            debug!("Resume during abort failed: {e}");
        }
        info!(step = self.tracker.step(), "BDHS aborted");
        self.emit(BdhsSignal::Aborted);
        Flow::Finish(Ok(BdhsOutcome::Aborted))
    }

    fn fail(&mut self, e: &HeapscopeError, pauses: &mut mpsc::UnboundedReceiver<ProtocolEvent>) {
        self.state = BdhsState::Error;
        error!(step = self.tracker.step(), "BDHS failed: {e}");
        self.emit(BdhsSignal::Failed { message: e.to_string() });

        let mut dropped = 0usize;
        while pauses.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded pending pauses");
        }
    }

    async fn complete(&mut self, started: Instant) {
        if let Some(id) = self.breakpoint_id.take() {
            if let Err(e) = self.debugger.remove_breakpoint(&id).await {
                warn!(breakpoint_id = %id, "Failed to remove handler breakpoint: {e}");
            }
        }
        if let Err(e) = self.debugger.disable().await {
            warn!("Failed to disable debugger: {e}");
        }
        if let Err(e) = self.debugger.off(DebuggerEvent::Paused) {
            debug!("Failed to unregister pause handler: {e}");
        }

        let elapsed = started.elapsed();
        debug!(state = ?self.state, elapsed_ms = elapsed.as_millis() as u64, "BDHS completed");
        self.emit(BdhsSignal::Completed { elapsed });
    }

    fn emit(&self, signal: BdhsSignal) {
        // The receiver may be gone; the run still completes.
        let _ = self.signals.send(signal);
    }
}
