//! In-memory transport with scripted replies
//!
//! Used by the test suites to drive sessions, workers and scans
//! deterministically. Replies are matched by substring of the command text;
//! one-shot replies queued with [`ScriptedTransport::push_reply`] win over
//! standing rules from [`ScriptedTransport::respond`]. Every exec is logged
//! with its start and end instant so tests can check serialization.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::connection::{Channel, ChannelOutput, SessionError, SessionResult, Transport};
use crate::models::Route;

/// What a scripted command does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Completes with this output
    Output(ChannelOutput),
    /// Reports a broken link
    Lost(String),
    /// Never completes
    Hang,
}

impl ScriptedReply {
    /// Exit status 0 with `stdout`
    #[must_use]
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::Output(ChannelOutput::ok(stdout))
    }

    /// Non-zero exit with `stderr`
    #[must_use]
    pub fn exit(status: i32, stderr: impl Into<String>) -> Self {
        Self::Output(ChannelOutput::failed(status, stderr))
    }
}

/// One command seen by a scripted channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    /// Command text
    pub command: String,
    /// Which `open` produced the channel (1-based)
    pub link: u32,
    /// When the channel started running it
    pub started: Instant,
    /// When it completed, `None` if it was abandoned
    pub finished: Option<Instant>,
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<(String, ScriptedReply)>,
    queued: VecDeque<(String, ScriptedReply)>,
    latency: Duration,
    failing_opens: u32,
    failing_hop: Option<usize>,
    opens: u32,
    broken_through: u32,
    probe_failing: bool,
    probes: u32,
    in_flight: u32,
    max_in_flight: u32,
    log: Vec<ExecRecord>,
}

impl Script {
    fn reply_for(&mut self, command: &str) -> ScriptedReply {
        if let Some(pos) = self.queued.iter().position(|(p, _)| command.contains(p.as_str())) {
            if let Some((_, reply)) = self.queued.remove(pos) {
                return reply;
            }
        }
        self.rules
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map_or_else(|| ScriptedReply::stdout(""), |(_, reply)| reply.clone())
    }
}

/// Transport whose channels follow a script
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Transport answering every command with empty output
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulated run time of every command
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.script().latency = latency;
        self
    }

    /// Standing reply for commands containing `pattern`; later rules win
    pub fn respond(&self, pattern: impl Into<String>, reply: ScriptedReply) {
        self.script().rules.push((pattern.into(), reply));
    }

    /// One-shot reply for the next command containing `pattern`
    pub fn push_reply(&self, pattern: impl Into<String>, reply: ScriptedReply) {
        self.script().queued.push_back((pattern.into(), reply));
    }

    /// Makes the next `count` opens fail
    pub fn fail_opens(&self, count: u32) {
        self.script().failing_opens = count;
    }

    /// Hop blamed by failing opens; the target hop unless set
    ///
    /// Indexes past the end of a route fall back to its target.
    pub fn fail_hop(&self, hop: usize) {
        self.script().failing_hop = Some(hop);
    }

    /// Breaks every channel opened so far
    pub fn break_links(&self) {
        let mut script = self.script();
        script.broken_through = script.opens;
    }

    /// Makes keepalive probes fail (or succeed again)
    pub fn set_probe_failing(&self, failing: bool) {
        self.script().probe_failing = failing;
    }

    /// Number of successful opens
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.script().opens
    }

    /// Number of probes answered
    #[must_use]
    pub fn probe_count(&self) -> u32 {
        self.script().probes
    }

    /// Every exec seen so far, in start order
    #[must_use]
    pub fn exec_log(&self) -> Vec<ExecRecord> {
        self.script().log.clone()
    }

    /// Command texts seen so far
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.script().log.iter().map(|r| r.command.clone()).collect()
    }

    /// Number of execs whose command contains `pattern`
    #[must_use]
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.script()
            .log
            .iter()
            .filter(|r| r.command.contains(pattern))
            .count()
    }

    /// Highest number of commands that were running at the same time
    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.script().max_in_flight
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, route: &Route) -> SessionResult<Box<dyn Channel>> {
        let mut script = self.script();
        if script.failing_opens > 0 {
            script.failing_opens -= 1;
            let last = route.len().saturating_sub(1);
            let hop = script.failing_hop.map_or(last, |hop| hop.min(last));
            return Err(SessionError::ConnectFailed {
                hop,
                host: route
                    .hops()
                    .get(hop)
                    .map_or_else(|| "local".to_string(), |h| h.host.clone()),
                cause: "scripted connect failure".to_string(),
            });
        }
        script.opens += 1;
        Ok(Box::new(ScriptedChannel {
            script: Arc::clone(&self.script),
            link: script.opens,
            closed: false,
        }))
    }
}

struct ScriptedChannel {
    script: Arc<Mutex<Script>>,
    link: u32,
    closed: bool,
}

/// Keeps the in-flight counter right when an exec future is dropped
struct InFlight {
    script: Arc<Mutex<Script>>,
    index: usize,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.in_flight -= 1;
    }
}

impl ScriptedChannel {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broken(&self) -> bool {
        self.closed || self.link <= self.script().broken_through
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn exec(&mut self, command: &str) -> SessionResult<ChannelOutput> {
        if self.broken() {
            return Err(SessionError::SessionLost("scripted link broken".to_string()));
        }

        let (reply, latency, guard) = {
            let mut script = self.script();
            let reply = script.reply_for(command);
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
            script.log.push(ExecRecord {
                command: command.to_string(),
                link: self.link,
                started: Instant::now(),
                finished: None,
            });
            let guard = InFlight {
                script: Arc::clone(&self.script),
                index: script.log.len() - 1,
            };
            (reply, script.latency, guard)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let result = match reply {
            ScriptedReply::Output(output) => Ok(output),
            ScriptedReply::Lost(reason) => Err(SessionError::SessionLost(reason)),
            ScriptedReply::Hang => return std::future::pending().await,
        };

        self.script().log[guard.index].finished = Some(Instant::now());
        drop(guard);
        result
    }

    async fn probe(&mut self) -> SessionResult<()> {
        let broken = self.broken();
        let mut script = self.script();
        script.probes += 1;
        if broken || script.probe_failing {
            Err(SessionError::SessionLost("scripted probe failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
