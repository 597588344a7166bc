//! Text output for CLI mode.
//!
//! This module formats progress events and the configuration summary as human-readable
//! lines. Every progress line starts with a local `YYYY/MM/DD HH:MM:SS` timestamp.

use crate::model::{
    local_now, BoardParams, ControlEvent, Metric, OutcomeStatus, PollEvent, Role,
    TransitionCommand,
};
use crate::registry::EndpointRegistry;
use time::macros::format_description;
use time::OffsetDateTime;

pub(crate) fn format_timestamp(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]/[month]/[day] [hour]:[minute]:[second]");
    ts.format(&fmt).unwrap_or_else(|_| ts.to_string())
}

fn metric_phrase(metric: Metric) -> &'static str {
    match metric {
        Metric::EventCount => "the number of events",
        Metric::RunDuration => "the run duration",
    }
}

/// Line for one progress event, or `None` for events that only delimit waves.
pub(crate) fn event_line(event: &ControlEvent) -> Option<String> {
    let line = match event {
        ControlEvent::CommandSent { command, target } => {
            let ts = format_timestamp(local_now());
            if *command == TransitionCommand::Init {
                format!("{ts}: Sending the INIT command to {}.", target.address)
            } else {
                format!(
                    "{ts}: Attempting to connect to {} and {command} a run.",
                    target.address
                )
            }
        }
        ControlEvent::Outcome(outcome) => {
            let result = match &outcome.status {
                OutcomeStatus::Completed(value) => value.clone(),
                OutcomeStatus::Failed(error) => format!("Exception: {error}"),
            };
            format!(
                "{}: {} on {} result: {result}",
                format_timestamp(outcome.timestamp),
                outcome.target.label,
                outcome.target.address
            )
        }
        ControlEvent::Poll(poll) => poll_line(poll),
        ControlEvent::Info(message) => message.clone(),
        ControlEvent::WaveStarted { .. } | ControlEvent::WaveFinished { .. } => return None,
    };
    Some(line)
}

fn poll_line(poll: &PollEvent) -> String {
    let ts = format_timestamp(local_now());
    match poll {
        PollEvent::Fetching { metric } => format!(
            "{ts}: Attempting to fetch {} from the Aggregator.",
            metric_phrase(*metric)
        ),
        PollEvent::Reported { metric, value } => match metric {
            Metric::EventCount => format!(
                "{ts}: The Aggregator reports the following number of events: {value}."
            ),
            Metric::RunDuration => format!(
                "{ts}: The Aggregator reports the following run duration: {value} seconds."
            ),
        },
        PollEvent::Failed { metric, error } => format!(
            "{ts}: There was a problem communicating with the Aggregator ({error}),\n  the fetch of {} will be retried.",
            metric_phrase(*metric)
        ),
    }
}

/// Per-host listing of every process with its rank, hosts in first-seen order and
/// processes sorted by port.
pub(crate) fn configuration_summary(registry: &EndpointRegistry) -> Vec<String> {
    let total_frs = registry.group_count(Role::FragmentReceiver);
    let total_ebs = registry.group_count(Role::EventBuilder);

    let mut entries: Vec<(&str, u16, String)> = Vec::new();
    for group in registry.groups(Role::EventBuilder) {
        entries.push((
            &group.address.host,
            group.address.port,
            format!(
                "EventBuilder, port {}, rank {}",
                group.address.port,
                total_frs + group.role_index
            ),
        ));
    }
    for board in registry.endpoints(Role::FragmentReceiver) {
        if let BoardParams::FragmentReceiver { kind, board_id } = &board.params {
            entries.push((
                &board.address.host,
                board.address.port,
                format!(
                    "FragmentReceiver, Simulated {kind}, port {}, rank {}, board_id {board_id}",
                    board.address.port, board.role_index
                ),
            ));
        }
    }
    for group in registry.groups(Role::Aggregator) {
        entries.push((
            &group.address.host,
            group.address.port,
            format!(
                "Aggregator, port {}, rank {}",
                group.address.port,
                total_frs + total_ebs + group.role_index
            ),
        ));
    }

    let mut hosts: Vec<&str> = Vec::new();
    for (host, _, _) in &entries {
        if !hosts.contains(host) {
            hosts.push(*host);
        }
    }

    let mut lines = vec!["Configuration Summary:".to_string()];
    for host in hosts {
        lines.push(format!("  {host}:"));
        let mut on_host: Vec<_> = entries.iter().filter(|(h, _, _)| *h == host).collect();
        on_host.sort_by_key(|(_, port, _)| *port);
        lines.extend(on_host.into_iter().map(|(_, _, line)| format!("    {line}")));
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, BoardKind, CommandOutcome, TargetInfo};
    use time::macros::datetime;

    fn target(label: &str) -> TargetInfo {
        TargetInfo {
            group: 0,
            address: Address::new("daq01", 5205),
            role: Role::EventBuilder,
            board_count: 1,
            label: label.to_string(),
        }
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(
            format_timestamp(datetime!(2014-03-07 09:05:01 UTC)),
            "2014/03/07 09:05:01"
        );
    }

    #[test]
    fn outcome_lines_name_the_target() {
        let ok = ControlEvent::Outcome(Box::new(CommandOutcome {
            target: target("EventBuilder"),
            command: TransitionCommand::Start,
            status: OutcomeStatus::Completed("Success".into()),
            timestamp: datetime!(2014-03-07 09:05:01 UTC),
        }));
        assert_eq!(
            event_line(&ok).unwrap(),
            "2014/03/07 09:05:01: EventBuilder on daq01:5205 result: Success"
        );

        let failed = ControlEvent::Outcome(Box::new(CommandOutcome {
            target: target("multi-board FragmentReceiver"),
            command: TransitionCommand::Stop,
            status: OutcomeStatus::Failed("call timed out after 45s".into()),
            timestamp: datetime!(2014-03-07 09:05:01 UTC),
        }));
        assert!(event_line(&failed)
            .unwrap()
            .ends_with("multi-board FragmentReceiver on daq01:5205 result: Exception: call timed out after 45s"));
    }

    #[test]
    fn sent_lines_differ_for_init() {
        let init = ControlEvent::CommandSent {
            command: TransitionCommand::Init,
            target: target("EventBuilder"),
        };
        assert!(event_line(&init)
            .unwrap()
            .ends_with(": Sending the INIT command to daq01:5205."));

        let pause = ControlEvent::CommandSent {
            command: TransitionCommand::Pause,
            target: target("EventBuilder"),
        };
        assert!(event_line(&pause)
            .unwrap()
            .ends_with(": Attempting to connect to daq01:5205 and pause a run."));
        assert!(event_line(&ControlEvent::WaveFinished {
            command: TransitionCommand::Pause
        })
        .is_none());
    }

    #[test]
    fn summary_groups_by_host_and_sorts_by_port() {
        let mut reg = EndpointRegistry::new();
        let toy = |kind, board_id| BoardParams::FragmentReceiver { kind, board_id };
        reg.add_board("daq01", 5206, toy(BoardKind::Toy1, 0));
        reg.add_board("daq01", 5205, toy(BoardKind::Toy2, 1));
        reg.add_board("daq02", 5235, BoardParams::EventBuilder);
        reg.add_board("daq01", 5265, BoardParams::Aggregator { bunch_size: 1 });

        assert_eq!(
            configuration_summary(&reg),
            vec![
                "Configuration Summary:",
                "  daq02:",
                "    EventBuilder, port 5235, rank 2",
                "",
                "  daq01:",
                "    FragmentReceiver, Simulated TOY2, port 5205, rank 1, board_id 1",
                "    FragmentReceiver, Simulated TOY1, port 5206, rank 0, board_id 0",
                "    Aggregator, port 5265, rank 3",
                "",
            ]
        );
    }
}
