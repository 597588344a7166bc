//! Concurrent command fan-out.
//!
//! A wave is planned sequentially (dedup against the sent ledger, timeout selection), then
//! every planned target gets its own task. The wave returns only after all tasks finished.

use crate::error::RpcError;
use crate::model::{
    local_now, CommandOutcome, ControlEvent, OutcomeStatus, Role, TargetInfo, TransitionCommand,
};
use crate::registry::{EndpointRegistry, GroupId, TargetGroup};
use crate::rpc::{RpcTransport, RpcValue};
use crate::settings::TimeoutSettings;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Timeout for one call, chosen by command and target shape.
pub fn command_timeout(
    timeouts: &TimeoutSettings,
    command: TransitionCommand,
    group: &TargetGroup,
) -> Duration {
    if command != TransitionCommand::Stop {
        return timeouts.default;
    }
    match group.role {
        Role::Aggregator => timeouts.stop_aggregator,
        Role::EventBuilder => timeouts.stop_event_builder,
        _ if group.is_multi_board() => timeouts.stop_event_builder,
        _ => timeouts.stop_other,
    }
}

/// One planned call inside a wave.
#[derive(Debug, Clone)]
struct WaveTask {
    target: TargetInfo,
    args: Vec<RpcValue>,
    timeout: Duration,
}

pub struct CommandDispatcher {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn RpcTransport>,
    timeouts: TimeoutSettings,
    events: UnboundedSender<ControlEvent>,
    /// (command, group) pairs already sent during this invocation.
    sent: HashSet<(TransitionCommand, GroupId)>,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn RpcTransport>,
        timeouts: TimeoutSettings,
        events: UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            registry,
            transport,
            timeouts,
            events,
            sent: HashSet::new(),
        }
    }

    /// Send `command` with the same argument to every listed group.
    pub async fn dispatch(
        &mut self,
        command: TransitionCommand,
        targets: &[GroupId],
        arg: Option<RpcValue>,
    ) -> Vec<CommandOutcome> {
        let items = targets.iter().map(|&g| (g, arg.clone())).collect();
        self.dispatch_payloads(command, items).await
    }

    /// Send `command` with a per-group argument (e.g. one configuration blob per target).
    pub async fn dispatch_payloads(
        &mut self,
        command: TransitionCommand,
        items: Vec<(GroupId, Option<RpcValue>)>,
    ) -> Vec<CommandOutcome> {
        let plan = self.plan_wave(command, items);

        let mut handles = Vec::with_capacity(plan.len());
        for task in plan {
            let _ = self.events.send(ControlEvent::CommandSent {
                command,
                target: task.target.clone(),
            });
            let info = task.target.clone();
            let transport = self.transport.clone();
            let events = self.events.clone();
            let handle = tokio::spawn(run_task(transport, events, command, task));
            handles.push((info, handle));
        }

        let events = self.events.clone();
        join_all(handles.into_iter().map(|(info, handle)| {
            let events = events.clone();
            async move {
                match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let outcome = CommandOutcome {
                            target: info,
                            command,
                            status: OutcomeStatus::Failed(format!("dispatch task failed: {e}")),
                            timestamp: local_now(),
                        };
                        let _ = events.send(ControlEvent::Outcome(Box::new(outcome.clone())));
                        outcome
                    }
                }
            }
        }))
        .await
    }

    /// Single-threaded pre-pass: marks each group as sent for `command` before anything is
    /// spawned, so aliases of one group within the wave collapse to a single task.
    fn plan_wave(
        &mut self,
        command: TransitionCommand,
        items: Vec<(GroupId, Option<RpcValue>)>,
    ) -> Vec<WaveTask> {
        let mut plan = Vec::new();
        for (id, arg) in items {
            let Some(group) = self.registry.group(id) else {
                warn!(group = id, %command, "dispatch to unknown target group skipped");
                continue;
            };
            if !self.sent.insert((command, id)) {
                debug!(address = %group.address, %command, "command already sent to group");
                continue;
            }
            plan.push(WaveTask {
                target: group.info(),
                args: arg.into_iter().collect(),
                timeout: command_timeout(&self.timeouts, command, group),
            });
        }
        plan
    }
}

async fn run_task(
    transport: Arc<dyn RpcTransport>,
    events: UnboundedSender<ControlEvent>,
    command: TransitionCommand,
    task: WaveTask,
) -> CommandOutcome {
    let WaveTask {
        target,
        args,
        timeout,
    } = task;
    let method = command.method();
    let call = transport.call(&target.address, &method, &args, timeout);
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(r) => r,
        Err(_) => Err(RpcError::Timeout(timeout)),
    };
    let status = match result {
        Ok(value) => OutcomeStatus::Completed(value),
        Err(e) => {
            warn!(address = %target.address, %command, error = %e, "command failed");
            OutcomeStatus::Failed(e.to_string())
        }
    };
    let outcome = CommandOutcome {
        target,
        command,
        status,
        timestamp: local_now(),
    };
    let _ = events.send(ControlEvent::Outcome(Box::new(outcome.clone())));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, BoardKind, BoardParams};
    use crate::rpc::testing::ScriptedTransport;
    use tokio::sync::mpsc;

    fn toy(board_id: u32) -> BoardParams {
        BoardParams::FragmentReceiver {
            kind: BoardKind::Toy1,
            board_id,
        }
    }

    struct Fixture {
        registry: Arc<EndpointRegistry>,
        transport: Arc<ScriptedTransport>,
        dispatcher: CommandDispatcher,
        _rx: mpsc::UnboundedReceiver<ControlEvent>,
    }

    fn fixture(build: impl FnOnce(&mut EndpointRegistry)) -> Fixture {
        let mut registry = EndpointRegistry::new();
        build(&mut registry);
        let registry = Arc::new(registry);
        let transport = Arc::new(ScriptedTransport::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = CommandDispatcher::new(
            registry.clone(),
            transport.clone(),
            TimeoutSettings::default(),
            tx,
        );
        Fixture {
            registry,
            transport,
            dispatcher,
            _rx: rx,
        }
    }

    fn timeout_for(transport: &ScriptedTransport, address: &Address) -> Duration {
        transport
            .starts()
            .into_iter()
            .find(|s| &s.0 == address)
            .map(|s| s.3)
            .unwrap()
    }

    #[tokio::test]
    async fn stop_timeouts_follow_role_and_board_count() {
        let mut f = fixture(|r| {
            r.add_board("h1", 5000, toy(0));
            r.add_board("h1", 5000, toy(1));
            r.add_board("h2", 5000, toy(2));
            r.add_board("h3", 5100, BoardParams::EventBuilder);
            r.add_board("h4", 5200, BoardParams::Aggregator { bunch_size: 1 });
        });
        let all: Vec<_> = f.registry.all_groups().iter().map(|g| g.id).collect();
        let outcomes = f
            .dispatcher
            .dispatch(TransitionCommand::Stop, &all, None)
            .await;
        assert_eq!(outcomes.len(), 4);

        let t = &f.transport;
        assert_eq!(timeout_for(t, &Address::new("h1", 5000)), Duration::from_secs(45));
        assert_eq!(timeout_for(t, &Address::new("h2", 5000)), Duration::from_secs(30));
        assert_eq!(timeout_for(t, &Address::new("h3", 5100)), Duration::from_secs(45));
        assert_eq!(timeout_for(t, &Address::new("h4", 5200)), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn other_commands_use_default_timeout() {
        let mut f = fixture(|r| {
            r.add_board("h4", 5200, BoardParams::Aggregator { bunch_size: 1 });
        });
        f.dispatcher
            .dispatch(TransitionCommand::Status, &[0], None)
            .await;
        assert_eq!(
            timeout_for(&f.transport, &Address::new("h4", 5200)),
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn aliased_boards_produce_one_outcome() {
        let mut f = fixture(|r| {
            r.add_board("h1", 5000, toy(0));
            r.add_board("h1", 5000, toy(1));
        });
        let targets = f.registry.endpoint_targets(Role::FragmentReceiver);
        assert_eq!(targets.len(), 2);

        let outcomes = f
            .dispatcher
            .dispatch(TransitionCommand::Init, &targets, Some(RpcValue::Str("cfg".into())))
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].target.board_count, 2);
        assert_eq!(f.transport.calls_to("daq.init"), 1);

        // The group already took part in an init wave.
        let again = f
            .dispatcher
            .dispatch(TransitionCommand::Init, &targets, None)
            .await;
        assert!(again.is_empty());

        let start = f
            .dispatcher
            .dispatch(TransitionCommand::Start, &targets, Some(RpcValue::Int(1)))
            .await;
        assert_eq!(start.len(), 1);
    }

    #[tokio::test]
    async fn failures_do_not_abort_siblings() {
        let mut f = fixture(|r| {
            r.add_board("h1", 5000, toy(0));
            r.add_board("h2", 5000, toy(1));
            r.add_board("h3", 5000, toy(2));
        });
        f.transport.reply(
            &Address::new("h2", 5000),
            "daq.pause",
            Err("connection refused".into()),
        );
        let outcomes = f
            .dispatcher
            .dispatch(TransitionCommand::Pause, &[0, 1, 2], None)
            .await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.is_failed()).count(), 1);
        assert!(outcomes[1].is_failed());
        assert_eq!(outcomes[0].status, OutcomeStatus::Completed("Success".into()));
        assert_eq!(outcomes[2].status, OutcomeStatus::Completed("Success".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_target_fails_after_its_timeout() {
        let mut f = fixture(|r| {
            r.add_board("h1", 5000, toy(0));
            r.add_board("h2", 5000, toy(1));
        });
        f.transport
            .delay(&Address::new("h1", 5000), Duration::from_secs(600));
        let started = tokio::time::Instant::now();
        let outcomes = f
            .dispatcher
            .dispatch(TransitionCommand::Stop, &[0, 1], None)
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
        match &outcomes[0].status {
            OutcomeStatus::Failed(msg) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(!outcomes[1].is_failed());
    }

    #[tokio::test]
    async fn unknown_groups_are_skipped() {
        let mut f = fixture(|r| {
            r.add_board("h1", 5000, toy(0));
        });
        let outcomes = f
            .dispatcher
            .dispatch(TransitionCommand::Status, &[0, 42], None)
            .await;
        assert_eq!(outcomes.len(), 1);
    }
}
