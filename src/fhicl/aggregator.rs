use super::{comment_unless, module_list, wf_viewer, SystemLayout};
use crate::model::{Endpoint, Role, TransitionParameters};
use crate::registry::EndpointRegistry;
use crate::settings::OnmonSettings;
use std::fmt::Write;

pub(super) struct AggregatorInputs<'a> {
    pub layout: &'a SystemLayout,
    pub ag_index: usize,
    pub bunch_size: u32,
    pub params: &'a TransitionParameters,
    pub boards: &'a [Endpoint],
    pub onmon: &'a OnmonSettings,
    pub xmlrpc_clients: &'a str,
}

/// Duty of one aggregator: all but the last log data, the last one feeds online monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregatorDuty {
    DataLogger,
    Dispatcher,
}

struct DutySettings {
    duty: AggregatorDuty,
    write_data: bool,
    online_monitoring: bool,
    queue_depth: u32,
    queue_wait_secs: u32,
}

fn duty_settings(ag_index: usize, total_ags: usize, params: &TransitionParameters) -> DutySettings {
    if ag_index + 1 < total_ags {
        DutySettings {
            duty: AggregatorDuty::DataLogger,
            write_data: params.write_data,
            online_monitoring: params.online_monitoring && total_ags <= 1,
            queue_depth: 20,
            queue_wait_secs: 5,
        }
    } else {
        DutySettings {
            duty: AggregatorDuty::Dispatcher,
            write_data: false,
            online_monitoring: params.online_monitoring,
            queue_depth: 2,
            queue_wait_secs: 1,
        }
    }
}

/// `;http://host:port/RPC2,<group>` for every process, one entry per target group.
pub(crate) fn xmlrpc_client_list(registry: &EndpointRegistry) -> String {
    let mut list = String::new();
    for role in [Role::FragmentReceiver, Role::EventBuilder, Role::Aggregator] {
        for group in registry.groups(role) {
            let _ = write!(list, ";{},{}", group.address.rpc_url(), role.xmlrpc_group());
        }
    }
    list
}

pub(super) fn aggregator(inputs: AggregatorInputs<'_>) -> String {
    let AggregatorInputs {
        layout,
        ag_index,
        bunch_size,
        params,
        boards,
        onmon,
        xmlrpc_clients,
    } = inputs;
    let duty = duty_settings(ag_index, layout.total_ags, params);
    let root = comment_unless(duty.write_data);
    let onmon_path = comment_unless(duty.online_monitoring);
    let duty_flag = match duty.duty {
        AggregatorDuty::DataLogger => "is_data_logger",
        AggregatorDuty::Dispatcher => "is_dispatcher",
    };

    let mut file_name = String::from("mu2e_artdaq_r%06r_sr%02s_%to");
    if layout.total_ags > 2 {
        let _ = write!(file_name, "_{ag_index}");
    }
    file_name.push_str(".root");
    let output_file = params.data_dir.join(file_name);

    format!(
        "# Aggregator {ag_index}, rank {rank}
services: {{
  scheduler: {{
    fileMode: NOMERGE
    errorOnFailureToPut: false
  }}
  NetMonTransportServiceInterface: {{
    service_provider: NetMonTransportService
  }}
}}

daq: {{
  max_fragment_size_words: {size_words}
  aggregator: {{
    mpi_buffer_count: {buffers}
    first_event_builder_rank: {frs}
    event_builder_count: {ebs}
    expected_events_per_bunch: {bunch_size}
    print_event_store_stats: true
    event_queue_depth: {queue_depth}
    event_queue_wait_time: {queue_wait}
    onmon_event_prescale: {prescale}
    xmlrpc_client_list: \"{xmlrpc_clients}\"
    file_size_MB: {file_size}
    file_duration: {file_duration}
    file_event_count: {file_events}
    {duty_flag}: true
  }}
}}

source: {{
  module_type: NetMonInput
}}
outputs: {{
  {root}normalOutput: {{
  {root}  module_type: RootOutput
  {root}  fileName: \"{output}\"
  {root}}}
}}
physics: {{
  analyzers: {{
{viewer}
  }}

  {onmon_path}a1: {modules}
  {root}my_output_modules: [ normalOutput ]
}}
process_name: DAQAG",
        rank = layout.total_frs + layout.total_ebs + ag_index,
        size_words = layout.input_buffer_size_words,
        buffers = layout.total_ebs * 8,
        frs = layout.total_frs,
        ebs = layout.total_ebs,
        queue_depth = duty.queue_depth,
        queue_wait = duty.queue_wait_secs,
        prescale = onmon.event_prescale,
        file_size = params.file_size_mb,
        file_duration = params.file_duration.map(|d| d.as_secs()).unwrap_or(0),
        file_events = params.events_in_file,
        output = output_file.display(),
        viewer = wf_viewer(boards, onmon.event_prescale),
        modules = module_list(&onmon.modules),
    )
}
