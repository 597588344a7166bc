//! Writes generated init configurations to disk so they can be reused by other tools.

use crate::fhicl::ConfigBlob;
use crate::model::{BoardParams, Role};
use crate::registry::TargetGroup;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// `BoardReader_<kind>_<host>_<port>.fcl`, `EventBuilder_<host>_<port>.fcl` or
/// `Aggregator_<host>_<port>.fcl`.
pub(crate) fn file_name(group: &TargetGroup) -> String {
    let address = &group.address;
    match group.role {
        Role::FragmentReceiver => {
            let kind = match group.boards.first().map(|b| &b.params) {
                _ if group.is_multi_board() => "multi-board",
                Some(BoardParams::FragmentReceiver { kind, .. }) => kind.as_str(),
                _ => "unknown",
            };
            format!("BoardReader_{kind}_{}_{}.fcl", address.host, address.port)
        }
        Role::EventBuilder => format!("EventBuilder_{}_{}.fcl", address.host, address.port),
        Role::Aggregator => format!("Aggregator_{}_{}.fcl", address.host, address.port),
    }
}

pub(crate) fn write_config(dir: &Path, group: &TargetGroup, blob: &ConfigBlob) -> Result<PathBuf> {
    let path = dir.join(file_name(group));
    std::fs::write(&path, blob.as_str())
        .with_context(|| format!("failed to write configuration to {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoardKind;
    use crate::registry::EndpointRegistry;

    fn toy(kind: BoardKind, board_id: u32) -> BoardParams {
        BoardParams::FragmentReceiver { kind, board_id }
    }

    #[test]
    fn names_follow_role_and_shape() {
        let mut reg = EndpointRegistry::new();
        let single = reg.add_board("h1", 5000, toy(BoardKind::Toy2, 0));
        let merged = reg.add_board("h1", 5001, toy(BoardKind::Toy1, 1));
        reg.add_board("h1", 5001, toy(BoardKind::Toy1, 2));
        let eb = reg.add_board("h2", 5100, BoardParams::EventBuilder);
        let ag = reg.add_board("h3", 5200, BoardParams::Aggregator { bunch_size: 1 });

        let name = |id| file_name(reg.group(id).unwrap());
        assert_eq!(name(single), "BoardReader_TOY2_h1_5000.fcl");
        assert_eq!(name(merged), "BoardReader_multi-board_h1_5001.fcl");
        assert_eq!(name(eb), "EventBuilder_h2_5100.fcl");
        assert_eq!(name(ag), "Aggregator_h3_5200.fcl");
    }

    #[test]
    fn writes_blob_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = EndpointRegistry::new();
        let eb = reg.add_board("localhost", 5235, BoardParams::EventBuilder);

        let path = write_config(
            dir.path(),
            reg.group(eb).unwrap(),
            &ConfigBlob("process_name: DAQ".into()),
        )
        .unwrap();
        assert_eq!(path, dir.path().join("EventBuilder_localhost_5235.fcl"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "process_name: DAQ");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = EndpointRegistry::new();
        let eb = reg.add_board("localhost", 5235, BoardParams::EventBuilder);
        let err = write_config(
            &dir.path().join("missing"),
            reg.group(eb).unwrap(),
            &ConfigBlob(String::new()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("EventBuilder_localhost_5235.fcl"));
    }
}
