use super::{comment_unless, module_list, wf_viewer, SystemLayout};
use crate::model::{Endpoint, TransitionParameters};
use crate::settings::OnmonSettings;

pub(super) fn event_builder(
    layout: &SystemLayout,
    eb_index: usize,
    params: &TransitionParameters,
    boards: &[Endpoint],
    onmon: &OnmonSettings,
) -> String {
    let has_aggregators = layout.total_ags >= 1;
    // With aggregators downstream the events are shipped over MPI; otherwise the event
    // builder writes them itself when disk writing is on.
    let rootmpi = comment_unless(has_aggregators);
    let root = comment_unless(!has_aggregators && params.write_data);
    let onmon_path = comment_unless(params.online_monitoring && !has_aggregators);
    let file_name = format!("mu2e_artdaq_eb{eb_index:02}_r%06r_sr%02s_%to.root");
    let output_file = params.data_dir.join(file_name);

    format!(
        "# EventBuilder {eb_index}, rank {rank}
services: {{
  scheduler: {{
    fileMode: NOMERGE
    errorOnFailureToPut: false
  }}
  NetMonTransportServiceInterface: {{
    service_provider: NetMonTransportService
    first_data_receiver_rank: {first_ag_rank}
    mpi_buffer_count: 8
    max_fragment_size_words: {size_words}
    data_receiver_count: {ags}
  }}
}}

daq: {{
  max_fragment_size_words: {size_words}
  event_builder: {{
    mpi_buffer_count: {buffers}
    first_fragment_receiver_rank: 0
    fragment_receiver_count: {frs}
    expected_fragments_per_event: {boards_total}
    use_art: true
    print_event_store_stats: false
    verbose: {verbose}
  }}
}}

outputs: {{
  {rootmpi}rootMPIOutput: {{
  {rootmpi}  module_type: RootMPIOutput
  {rootmpi}}}
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
  {rootmpi}my_output_modules: [ rootMPIOutput ]
  {root}my_output_modules: [ normalOutput ]
}}
source: {{
  module_type: RawInput
  waiting_time: 2500000
  resume_after_timeout: true
  fragment_type_map: [[2, \"TOY1\"], [3, \"TOY2\"]]
}}
process_name: DAQ",
        rank = layout.total_frs + eb_index,
        first_ag_rank = layout.total_frs + layout.total_ebs,
        size_words = layout.input_buffer_size_words,
        ags = layout.total_ags,
        buffers = layout.total_frs * 8,
        frs = layout.total_frs,
        boards_total = layout.total_boards,
        verbose = !has_aggregators,
        output = output_file.display(),
        viewer = wf_viewer(boards, onmon.event_prescale),
        modules = module_list(&onmon.modules),
    )
}
