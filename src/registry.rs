//! Endpoint registry.
//!
//! Logical endpoints (one per `--toy1`, `--eb`, ... option) are folded into target groups so
//! that every distinct host:port of a role is addressed by exactly one RPC target.

use crate::model::{Address, BoardParams, Endpoint, Role, TargetInfo};
use std::collections::HashMap;

/// Index of a [`TargetGroup`] in the registry.
pub type GroupId = usize;

/// Deduplicated physical RPC endpoint, possibly standing in for several boards.
#[derive(Debug, Clone)]
pub struct TargetGroup {
    pub id: GroupId,
    pub address: Address,
    pub role: Role,
    /// Position among the groups of the same role.
    pub role_index: usize,
    /// Logical endpoints served by this group, in registration order.
    pub boards: Vec<Endpoint>,
}

impl TargetGroup {
    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    pub fn is_multi_board(&self) -> bool {
        self.boards.len() > 1
    }

    pub fn label(&self) -> String {
        match self.role {
            Role::FragmentReceiver if self.is_multi_board() => {
                "multi-board FragmentReceiver".to_string()
            }
            Role::FragmentReceiver => match self.boards.first().map(|b| &b.params) {
                Some(BoardParams::FragmentReceiver { kind, .. }) => {
                    format!("{kind} FragmentReceiver")
                }
                _ => "FragmentReceiver".to_string(),
            },
            role => role.to_string(),
        }
    }

    pub fn info(&self) -> TargetInfo {
        TargetInfo {
            group: self.id,
            address: self.address.clone(),
            role: self.role,
            board_count: self.board_count(),
            label: self.label(),
        }
    }
}

/// Holds all endpoints of the invocation. Built once, read-only afterwards.
///
/// Groups are keyed by host:port alone, so one address is always one RPC target. The first
/// board registered on an address fixes the group's role; mixing roles on one address is a
/// configuration error that callers reject before registering (see `cli::build_registry`).
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    groups: Vec<TargetGroup>,
    endpoints: Vec<Endpoint>,
    by_address: HashMap<Address, GroupId>,
    role_counts: HashMap<Role, usize>,
    group_counts: HashMap<Role, usize>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a board. A board on an already registered host:port joins that group and
    /// gets its id back.
    pub fn add_board(&mut self, host: &str, port: u16, params: BoardParams) -> GroupId {
        let role = params.role();
        let address = Address::new(host, port);
        let role_index = {
            let n = self.role_counts.entry(role).or_insert(0);
            *n += 1;
            *n - 1
        };
        let endpoint = Endpoint {
            address: address.clone(),
            role,
            role_index,
            params,
        };
        self.endpoints.push(endpoint.clone());

        if let Some(&id) = self.by_address.get(&address) {
            self.groups[id].boards.push(endpoint);
            return id;
        }

        let id = self.groups.len();
        let group_index = {
            let n = self.group_counts.entry(role).or_insert(0);
            *n += 1;
            *n - 1
        };
        self.groups.push(TargetGroup {
            id,
            address: address.clone(),
            role,
            role_index: group_index,
            boards: vec![endpoint],
        });
        self.by_address.insert(address, id);
        id
    }

    /// Groups of one role, in insertion order.
    pub fn groups(&self, role: Role) -> impl Iterator<Item = &TargetGroup> + '_ {
        self.groups.iter().filter(move |g| g.role == role)
    }

    pub fn group(&self, id: GroupId) -> Option<&TargetGroup> {
        self.groups.get(id)
    }

    pub fn all_groups(&self) -> &[TargetGroup] {
        &self.groups
    }

    /// Logical endpoints of one role, in registration order.
    pub fn endpoints(&self, role: Role) -> impl Iterator<Item = &Endpoint> + '_ {
        self.endpoints.iter().filter(move |e| e.role == role)
    }

    /// Group ids a command would alias to when sent to every logical endpoint of `role`.
    /// Boards behind one group repeat its id; the dispatcher collapses them.
    pub fn endpoint_targets(&self, role: Role) -> Vec<GroupId> {
        self.endpoints(role)
            .filter_map(|e| self.by_address.get(&e.address).copied())
            .collect()
    }

    pub fn group_count(&self, role: Role) -> usize {
        self.group_counts.get(&role).copied().unwrap_or(0)
    }

    pub fn endpoint_count(&self, role: Role) -> usize {
        self.role_counts.get(&role).copied().unwrap_or(0)
    }

    /// Role already registered on `address`, if any.
    pub fn role_at(&self, address: &Address) -> Option<Role> {
        self.by_address
            .get(address)
            .and_then(|&id| self.groups.get(id))
            .map(|g| g.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoardKind;

    fn toy(board_id: u32) -> BoardParams {
        BoardParams::FragmentReceiver {
            kind: BoardKind::Toy1,
            board_id,
        }
    }

    #[test]
    fn shared_host_port_collapses_into_one_group() {
        let mut reg = EndpointRegistry::new();
        let a = reg.add_board("h1", 5000, toy(0));
        let b = reg.add_board("h1", 5000, toy(1));
        assert_eq!(a, b);

        let groups: Vec<_> = reg.groups(Role::FragmentReceiver).collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].board_count(), 2);
        assert_eq!(groups[0].label(), "multi-board FragmentReceiver");
        assert_eq!(reg.endpoint_targets(Role::FragmentReceiver), vec![a, a]);
    }

    #[test]
    fn groups_preserve_insertion_order_and_never_outnumber_boards() {
        let mut reg = EndpointRegistry::new();
        let inputs = [
            ("h2", 5001),
            ("h1", 5000),
            ("h2", 5001),
            ("h3", 5002),
            ("h1", 5000),
        ];
        for (i, (host, port)) in inputs.iter().enumerate() {
            reg.add_board(host, *port, toy(i as u32));
        }
        let hosts: Vec<_> = reg
            .groups(Role::FragmentReceiver)
            .map(|g| g.address.host.as_str())
            .collect();
        assert_eq!(hosts, vec!["h2", "h1", "h3"]);
        assert!(reg.group_count(Role::FragmentReceiver) <= inputs.len());
        assert_eq!(reg.endpoint_count(Role::FragmentReceiver), inputs.len());

        let indices: Vec<_> = reg
            .groups(Role::FragmentReceiver)
            .map(|g| g.role_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn roles_are_grouped_independently() {
        let mut reg = EndpointRegistry::new();
        reg.add_board("h1", 5000, toy(0));
        let eb = reg.add_board("h1", 5100, BoardParams::EventBuilder);
        let ag0 = reg.add_board("h1", 5200, BoardParams::Aggregator { bunch_size: 1 });
        let ag1 = reg.add_board("h1", 5201, BoardParams::Aggregator { bunch_size: 1 });

        assert_ne!(ag0, ag1);
        assert_eq!(reg.group(eb).unwrap().label(), "EventBuilder");
        assert_eq!(reg.group(ag1).unwrap().role_index, 1);
        assert_eq!(
            reg.role_at(&Address::new("h1", 5100)),
            Some(Role::EventBuilder)
        );
        assert_eq!(reg.role_at(&Address::new("h9", 1)), None);
    }

    #[test]
    fn one_address_is_one_group_whatever_the_role() {
        let mut reg = EndpointRegistry::new();
        let eb = reg.add_board("h1", 5000, BoardParams::EventBuilder);
        let ag = reg.add_board("h1", 5000, BoardParams::Aggregator { bunch_size: 1 });
        assert_eq!(eb, ag);
        assert_eq!(reg.all_groups().len(), 1);
        assert_eq!(reg.group(eb).unwrap().role, Role::EventBuilder);
        assert_eq!(reg.role_at(&Address::new("h1", 5000)), Some(Role::EventBuilder));
        assert_eq!(reg.group_count(Role::Aggregator), 0);
        assert_eq!(reg.endpoint_targets(Role::Aggregator), vec![eb]);
    }

    #[test]
    fn single_board_label_names_its_kind() {
        let mut reg = EndpointRegistry::new();
        let id = reg.add_board(
            "h1",
            5000,
            BoardParams::FragmentReceiver {
                kind: BoardKind::Toy2,
                board_id: 7,
            },
        );
        let info = reg.group(id).unwrap().info();
        assert_eq!(info.label, "TOY2 FragmentReceiver");
        assert_eq!(info.board_count, 1);
    }
}
