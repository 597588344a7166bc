//! Transition controller.
//!
//! Turns one transition command into ordered dispatch waves and emits events for
//! presentation layers.

use super::serialize;
use crate::dispatch::CommandDispatcher;
use crate::fhicl::{self, ConfigBlob, ConfigGenerator, ConfigRequest, SystemLayout};
use crate::model::{
    BoardParams, CommandOutcome, ControlEvent, Endpoint, Role, TransitionCommand,
    TransitionParameters, TransitionReport,
};
use crate::monitor::RunBoundaryMonitor;
use crate::registry::{EndpointRegistry, GroupId, TargetGroup};
use crate::rpc::{RpcTransport, RpcValue};
use crate::settings::ControlSettings;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

const READY_ORDER: [Role; 3] = [Role::Aggregator, Role::EventBuilder, Role::FragmentReceiver];
const DATA_FLOW_ORDER: [Role; 3] = [Role::FragmentReceiver, Role::EventBuilder, Role::Aggregator];

/// Drives the registered processes through one invocation's transitions.
///
/// Holds the dispatcher's sent ledger, so a command reaches each target group at most once
/// per `RunControl`.
pub(crate) struct RunControl {
    registry: Arc<EndpointRegistry>,
    dispatcher: CommandDispatcher,
    monitor: RunBoundaryMonitor,
    generator: Arc<dyn ConfigGenerator>,
    params: TransitionParameters,
    settings: ControlSettings,
    events: UnboundedSender<ControlEvent>,
    serialize_dir: Option<PathBuf>,
}

impl RunControl {
    pub(crate) fn new(
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn RpcTransport>,
        generator: Arc<dyn ConfigGenerator>,
        params: TransitionParameters,
        settings: ControlSettings,
        events: UnboundedSender<ControlEvent>,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(
            registry.clone(),
            transport.clone(),
            settings.timeouts.clone(),
            events.clone(),
        );
        let monitor = RunBoundaryMonitor::new(transport, settings.monitor.clone(), events.clone());
        Self {
            registry,
            dispatcher,
            monitor,
            generator,
            params,
            settings,
            events,
            serialize_dir: None,
        }
    }

    /// Also write every generated init configuration into `dir`.
    pub(crate) fn serialize_to(mut self, dir: PathBuf) -> Self {
        self.serialize_dir = Some(dir);
        self
    }

    pub(crate) async fn execute(&mut self, command: TransitionCommand) -> Result<TransitionReport> {
        info!(%command, "executing transition");
        let mut report = TransitionReport {
            command,
            outcomes: Vec::new(),
            boundary: None,
        };
        match command {
            TransitionCommand::Init => report.outcomes = self.init().await?,
            TransitionCommand::Start => {
                let arg = RpcValue::Int(i64::from(self.params.run_number));
                report.outcomes = self.ordered(command, &READY_ORDER, Some(arg)).await;
            }
            TransitionCommand::Stop => {
                if let Some(boundary) = self.params.run_boundary() {
                    report.boundary = self.monitor.wait_for_boundary(&self.registry, boundary).await;
                }
                report.outcomes = self.stop().await;
            }
            TransitionCommand::Shutdown => {
                report.outcomes = self.ordered(command, &DATA_FLOW_ORDER, None).await;
            }
            TransitionCommand::Pause
            | TransitionCommand::Resume
            | TransitionCommand::Status
            | TransitionCommand::LegalCommands => {
                report.outcomes = self.ordered(command, &READY_ORDER, None).await;
            }
        }
        info!(
            %command,
            outcomes = report.outcomes.len(),
            failures = report.failures(),
            "transition finished"
        );
        Ok(report)
    }

    /// One wave per role, in the given order.
    async fn ordered(
        &mut self,
        command: TransitionCommand,
        order: &[Role],
        arg: Option<RpcValue>,
    ) -> Vec<CommandOutcome> {
        let mut outcomes = Vec::new();
        for &role in order {
            let targets = self.registry.endpoint_targets(role);
            if targets.is_empty() {
                continue;
            }
            self.wave_started(command, &[role], targets.len());
            outcomes.extend(self.dispatcher.dispatch(command, &targets, arg.clone()).await);
            self.wave_finished(command);
        }
        outcomes
    }

    /// Board readers and event builders as group waves, then every aggregator on its own.
    async fn stop(&mut self) -> Vec<CommandOutcome> {
        let command = TransitionCommand::Stop;
        let mut outcomes = self
            .ordered(command, &[Role::FragmentReceiver, Role::EventBuilder], None)
            .await;
        let aggregators: Vec<GroupId> = self
            .registry
            .groups(Role::Aggregator)
            .map(|g| g.id)
            .collect();
        for id in aggregators {
            self.wave_started(command, &[Role::Aggregator], 1);
            outcomes.extend(self.dispatcher.dispatch(command, &[id], None).await);
            self.wave_finished(command);
        }
        outcomes
    }

    async fn init(&mut self) -> Result<Vec<CommandOutcome>> {
        let command = TransitionCommand::Init;
        let layout = SystemLayout::from_registry(&self.registry, &self.settings.daq);
        let registry = self.registry.clone();

        let mut fr_items = Vec::new();
        for group in registry.groups(Role::FragmentReceiver) {
            let blob = self.board_reader_config(&layout, group);
            self.serialize(group, &blob)?;
            fr_items.push((group.id, Some(RpcValue::Str(blob.into_inner()))));
        }
        let mut outcomes = self.wave(command, &[Role::FragmentReceiver], fr_items).await;

        let boards: Vec<Endpoint> = registry.endpoints(Role::FragmentReceiver).cloned().collect();
        let xmlrpc_clients = fhicl::xmlrpc_client_list(&registry);
        let mut downstream = Vec::new();
        for group in registry.groups(Role::EventBuilder) {
            let blob = self.generator.generate(&ConfigRequest::EventBuilder {
                layout: &layout,
                eb_index: group.role_index,
                params: &self.params,
                boards: &boards,
                onmon: &self.settings.onmon,
            });
            self.serialize(group, &blob)?;
            downstream.push((group.id, Some(RpcValue::Str(blob.into_inner()))));
        }
        for group in registry.groups(Role::Aggregator) {
            let bunch_size = match group.boards.first().map(|b| &b.params) {
                Some(BoardParams::Aggregator { bunch_size }) => *bunch_size,
                _ => 1,
            };
            let blob = self.generator.generate(&ConfigRequest::Aggregator {
                layout: &layout,
                ag_index: group.role_index,
                bunch_size,
                params: &self.params,
                boards: &boards,
                onmon: &self.settings.onmon,
                xmlrpc_clients: &xmlrpc_clients,
            });
            self.serialize(group, &blob)?;
            downstream.push((group.id, Some(RpcValue::Str(blob.into_inner()))));
        }
        outcomes.extend(
            self.wave(command, &[Role::EventBuilder, Role::Aggregator], downstream)
                .await,
        );
        Ok(outcomes)
    }

    /// A single board gets its own document; a merged group gets one composite.
    fn board_reader_config(&self, layout: &SystemLayout, group: &TargetGroup) -> ConfigBlob {
        let children: Vec<ConfigBlob> = group
            .boards
            .iter()
            .map(|board| {
                self.generator
                    .generate(&ConfigRequest::BoardReader { layout, board })
            })
            .collect();
        if !group.is_multi_board() {
            if let Some(only) = children.into_iter().next() {
                return only;
            }
            return ConfigBlob(String::new());
        }
        debug!(address = %group.address, boards = group.board_count(), "merging board configurations");
        self.generator.generate(&ConfigRequest::Composite {
            layout,
            children: &children,
        })
    }

    fn serialize(&self, group: &TargetGroup, blob: &ConfigBlob) -> Result<()> {
        let Some(dir) = self.serialize_dir.as_deref() else {
            return Ok(());
        };
        let path = serialize::write_config(dir, group, blob)?;
        let _ = self
            .events
            .send(ControlEvent::Info(format!("  writing {}...", path.display())));
        Ok(())
    }

    /// Wave with a per-group payload.
    async fn wave(
        &mut self,
        command: TransitionCommand,
        roles: &[Role],
        items: Vec<(GroupId, Option<RpcValue>)>,
    ) -> Vec<CommandOutcome> {
        if items.is_empty() {
            return Vec::new();
        }
        self.wave_started(command, roles, items.len());
        let outcomes = self.dispatcher.dispatch_payloads(command, items).await;
        self.wave_finished(command);
        outcomes
    }

    fn wave_started(&self, command: TransitionCommand, roles: &[Role], targets: usize) {
        let _ = self.events.send(ControlEvent::WaveStarted {
            command,
            roles: roles.to_vec(),
            targets,
        });
    }

    fn wave_finished(&self, command: TransitionCommand) {
        let _ = self.events.send(ControlEvent::WaveFinished { command });
    }
}
