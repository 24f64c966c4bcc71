//! # vnodebalance
//!
//! Picks the data node that should host a new vnode.
//!
//! Placement is a single linear scan: among dnodes that still have a free
//! vnode slot, the one with the lowest open/total ratio wins. On equal
//! usage the dnode seen last wins.

#![warn(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

/// A data node as seen by the management node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dnode {
    /// Cluster-wide dnode id
    pub id: u32,
    /// Vnodes currently open on the dnode
    pub open_vnodes: u32,
    /// Vnode slots the dnode offers
    pub total_vnodes: u32,
    /// Address used inside the cluster
    pub private_ip: u32,
    /// Address advertised to clients
    pub public_ip: u32,
}

impl Dnode {
    /// Fraction of vnode slots in use, `None` if the dnode can take no more
    pub fn usage(&self) -> Option<f32> {
        if self.total_vnodes > 0 && self.open_vnodes < self.total_vnodes {
            Some(self.open_vnodes as f32 / self.total_vnodes as f32)
        } else {
            None
        }
    }
}

/// Where a vnode was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnodeGid {
    /// Chosen dnode
    pub dnode_id: u32,
    /// Its private address
    pub private_ip: u32,
    /// Its public address
    pub public_ip: u32,
}

/// Placement failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    /// No dnode has a free vnode slot
    NoEnoughDnodes,
}

impl fmt::Display for BalanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceError::NoEnoughDnodes => write!(f, "No dnode has a free vnode slot"),
        }
    }
}

impl std::error::Error for BalanceError {}

/// Choose the least utilized dnode for a new vnode
///
/// # Arguments
/// * `dnodes` - Every dnode in the cluster, in iteration order
///
/// # Returns
/// * `Result<VnodeGid, BalanceError>` - Placement of the new vnode
pub fn alloc_vnode<'a, I>(dnodes: I) -> Result<VnodeGid, BalanceError>
where
    I: IntoIterator<Item = &'a Dnode>,
{
    let mut selected: Option<&Dnode> = None;
    let mut best = 1.0f32;

    for dnode in dnodes {
        if let Some(usage) = dnode.usage() {
            if usage <= best {
                selected = Some(dnode);
                best = usage;
            }
        }
    }

    let Some(dnode) = selected else {
        error!("failed to alloc vnode, no dnode has a free slot");
        return Err(BalanceError::NoEnoughDnodes);
    };

    trace!(
        dnode = dnode.id,
        open_vnodes = dnode.open_vnodes,
        "alloc one vnode"
    );
    Ok(VnodeGid {
        dnode_id: dnode.id,
        private_ip: dnode.private_ip,
        public_ip: dnode.public_ip,
    })
}
