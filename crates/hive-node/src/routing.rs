use hive_core::{Guid, NodeAddress, DIGIT_RADIX, N_DIGITS};
use parking_lot::RwLock;
use tracing::debug;

/// Entries kept per routing slot.
pub const DEFAULT_SLOT_DEPTH: usize = 8;

/// Next-hop selection used by the routing engine.
pub trait Router: Send + Sync {
    /// Next hop toward `destination`, or `None` when this node is the root for it.
    fn route(&self, destination: &Guid) -> Option<NodeAddress>;
    /// Learns a neighbour. Returns whether the table changed.
    fn add(&self, address: NodeAddress) -> bool;
    /// Forgets a neighbour. Returns whether it was present.
    fn remove(&self, address: &NodeAddress) -> bool;

    fn is_root(&self, destination: &Guid) -> bool {
        self.route(destination).is_none()
    }
}

/// Prefix routing table of `N_DIGITS` levels by `DIGIT_RADIX` slots.
///
/// A neighbour sharing `l` leading digits with the local node lives at level `l`, in
/// the slot named by its digit `l`. The local node sits in its own slot at every
/// level, so each level has at least one occupied slot. Slots keep at most
/// `slot_depth` entries; the first entry of a slot is the preferred hop.
pub struct NeighbourMap {
    local: NodeAddress,
    slot_depth: usize,
    levels: RwLock<Vec<Vec<Vec<NodeAddress>>>>,
}

impl NeighbourMap {
    pub fn new(local: NodeAddress) -> Self {
        Self::with_slot_depth(local, DEFAULT_SLOT_DEPTH)
    }

    pub fn with_slot_depth(local: NodeAddress, slot_depth: usize) -> Self {
        let mut levels = vec![vec![Vec::new(); DIGIT_RADIX]; N_DIGITS];
        for (level, slots) in levels.iter_mut().enumerate() {
            slots[usize::from(local.node_id.digit(level))].push(local.clone());
        }
        Self {
            local,
            slot_depth: slot_depth.max(1),
            levels: RwLock::new(levels),
        }
    }

    pub fn local(&self) -> &NodeAddress {
        &self.local
    }

    /// Every known neighbour, excluding the local node, closest first.
    pub fn neighbours(&self) -> Vec<NodeAddress> {
        let levels = self.levels.read();
        let mut out: Vec<NodeAddress> = levels
            .iter()
            .flatten()
            .flatten()
            .filter(|address| **address != self.local)
            .cloned()
            .collect();
        out.sort_by_key(|address| (self.local.node_id.distance(&address.node_id), address.node_id));
        out
    }

    pub fn contains(&self, node_id: &Guid) -> bool {
        let (level, digit) = self.slot_of(node_id);
        self.levels.read()[level][digit]
            .iter()
            .any(|address| address.node_id == *node_id)
    }

    fn slot_of(&self, node_id: &Guid) -> (usize, usize) {
        let level = self.local.node_id.shared_prefix_len(node_id).min(N_DIGITS - 1);
        (level, usize::from(node_id.digit(level)))
    }
}

impl Router for NeighbourMap {
    /// Walks levels from the top: at each level scan forward from the destination's
    /// digit to the first occupied slot. Landing on the local node descends a level.
    fn route(&self, destination: &Guid) -> Option<NodeAddress> {
        let levels = self.levels.read();
        for (hop, slots) in levels.iter().enumerate().take(N_DIGITS - 1) {
            let wanted = usize::from(destination.digit(hop));
            let slot = (0..DIGIT_RADIX)
                .map(|step| &slots[(wanted + step) % DIGIT_RADIX])
                .find(|slot| !slot.is_empty())?;
            let first = &slot[0];
            if first.node_id != self.local.node_id {
                return Some(first.clone());
            }
        }
        None
    }

    fn add(&self, address: NodeAddress) -> bool {
        if address.node_id == self.local.node_id {
            return false;
        }
        let (level, digit) = self.slot_of(&address.node_id);
        let mut levels = self.levels.write();
        let slot = &mut levels[level][digit];
        if let Some(existing) = slot.iter_mut().find(|entry| **entry == address) {
            if existing.endpoint() == address.endpoint() {
                return false;
            }
            *existing = address;
            return true;
        }
        if slot.len() >= self.slot_depth {
            debug!(%address, level, digit, "routing slot full, neighbour not added");
            return false;
        }
        slot.push(address);
        true
    }

    fn remove(&self, address: &NodeAddress) -> bool {
        if address.node_id == self.local.node_id {
            return false;
        }
        let (level, digit) = self.slot_of(&address.node_id);
        let mut levels = self.levels.write();
        let slot = &mut levels[level][digit];
        let before = slot.len();
        slot.retain(|entry| entry != address);
        slot.len() != before
    }
}
