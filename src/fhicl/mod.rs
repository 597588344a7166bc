//! Configuration documents sent as the payload of `daq.init`.
//!
//! The controller only depends on [`ConfigGenerator`]; [`FhiclGenerator`] renders the FHiCL
//! documents artdaq's BoardReaderMain, EventBuilderMain and AggregatorMain expect.

mod aggregator;
mod board_reader;
mod event_builder;

use crate::model::{Endpoint, Role, TransitionParameters};
use crate::registry::EndpointRegistry;
use crate::settings::{DaqSettings, OnmonSettings};
use std::fmt;

pub(crate) use aggregator::xmlrpc_client_list;

/// Opaque configuration text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBlob(pub String);

impl ConfigBlob {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConfigBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counts every generated document needs to agree on (ranks, buffer sizes).
#[derive(Debug, Clone)]
pub struct SystemLayout {
    /// Fragment receiver processes, i.e. target groups, not boards.
    pub total_frs: usize,
    pub total_ebs: usize,
    pub total_ags: usize,
    pub total_boards: usize,
    pub input_buffer_size_words: u64,
}

impl SystemLayout {
    pub fn from_registry(registry: &EndpointRegistry, daq: &DaqSettings) -> Self {
        Self {
            total_frs: registry.group_count(Role::FragmentReceiver),
            total_ebs: registry.group_count(Role::EventBuilder),
            total_ags: registry.group_count(Role::Aggregator),
            total_boards: registry.endpoint_count(Role::FragmentReceiver),
            input_buffer_size_words: daq.input_buffer_size_words,
        }
    }
}

/// What to generate, per process role.
#[derive(Debug)]
pub enum ConfigRequest<'a> {
    /// One board as read out by a single-board fragment receiver.
    BoardReader {
        layout: &'a SystemLayout,
        board: &'a Endpoint,
    },
    /// Several boards behind one host:port, merged into one document.
    Composite {
        layout: &'a SystemLayout,
        children: &'a [ConfigBlob],
    },
    EventBuilder {
        layout: &'a SystemLayout,
        eb_index: usize,
        params: &'a TransitionParameters,
        boards: &'a [Endpoint],
        onmon: &'a OnmonSettings,
    },
    Aggregator {
        layout: &'a SystemLayout,
        ag_index: usize,
        bunch_size: u32,
        params: &'a TransitionParameters,
        boards: &'a [Endpoint],
        onmon: &'a OnmonSettings,
        xmlrpc_clients: &'a str,
    },
}

pub trait ConfigGenerator: Send + Sync {
    fn generate(&self, request: &ConfigRequest<'_>) -> ConfigBlob;
}

/// Default generator producing artdaq FHiCL.
#[derive(Debug, Default, Clone)]
pub struct FhiclGenerator;

impl ConfigGenerator for FhiclGenerator {
    fn generate(&self, request: &ConfigRequest<'_>) -> ConfigBlob {
        let text = match request {
            ConfigRequest::BoardReader { layout, board } => board_reader::board_reader(layout, board),
            ConfigRequest::Composite { layout, children } => {
                board_reader::composite(layout, children)
            }
            ConfigRequest::EventBuilder {
                layout,
                eb_index,
                params,
                boards,
                onmon,
            } => event_builder::event_builder(layout, *eb_index, params, boards, onmon),
            ConfigRequest::Aggregator {
                layout,
                ag_index,
                bunch_size,
                params,
                boards,
                onmon,
                xmlrpc_clients,
            } => aggregator::aggregator(aggregator::AggregatorInputs {
                layout,
                ag_index: *ag_index,
                bunch_size: *bunch_size,
                params,
                boards,
                onmon,
                xmlrpc_clients,
            }),
        };
        ConfigBlob(text)
    }
}

/// `"#"` when `enabled` is false, used to comment out optional FHiCL lines.
fn comment_unless(enabled: bool) -> &'static str {
    if enabled {
        ""
    } else {
        "#"
    }
}

/// Waveform viewer analyzer block listing every board's fragment id and type.
fn wf_viewer(boards: &[Endpoint], prescale: u32) -> String {
    use crate::model::BoardParams;
    let mut ids = Vec::new();
    let mut kinds = Vec::new();
    for b in boards {
        if let BoardParams::FragmentReceiver { kind, board_id } = &b.params {
            ids.push(board_id.to_string());
            kinds.push(kind.as_str());
        }
    }
    format!(
        "    app: {{
      module_type: RootApplication
      force_new: true
    }}
    wf: {{
      module_type: WFViewer
      fragment_ids: [ {} ]
      fragment_type_labels: [ {} ]
      prescale: {prescale}
      digital_sum_only: false
    }}",
        ids.join(", "),
        kinds.join(", ")
    )
}

fn module_list(modules: &[String]) -> String {
    format!("[ {} ]", modules.join(", "))
}
