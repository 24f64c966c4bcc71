//! Simulated cluster: dnodes and the vgroups placed on them

use anyhow::{Context, Result};
use conncache::PeerKey;
use vnodebalance::{alloc_vnode, Dnode, VnodeGid};

/// Port every simulated dnode serves RPC on
pub const RPC_PORT: u16 = 6030;

pub struct Cluster {
    pub dnodes: Vec<Dnode>,
    pub vgroups: Vec<VnodeGid>,
}

impl Cluster {
    /// Create `dnode_count` dnodes and place `vgroup_count` vgroups on them
    pub fn build(dnode_count: u32, vnodes_per_dnode: u32, vgroup_count: u32) -> Result<Self> {
        let mut dnodes: Vec<Dnode> = (1..=dnode_count)
            .map(|id| Dnode {
                id,
                open_vnodes: 0,
                total_vnodes: vnodes_per_dnode,
                private_ip: 0x0A00_0000 + id,
                public_ip: 0xC0A8_0000 + id,
            })
            .collect();

        let mut vgroups = Vec::with_capacity(vgroup_count as usize);
        for n in 0..vgroup_count {
            let gid = alloc_vnode(&dnodes).with_context(|| format!("placing vgroup {}", n))?;
            if let Some(dnode) = dnodes.iter_mut().find(|d| d.id == gid.dnode_id) {
                dnode.open_vnodes += 1;
            }
            vgroups.push(gid);
        }

        Ok(Self { dnodes, vgroups })
    }

    /// RPC peer serving `vgroup` over connection kind `kind`
    pub fn peer(&self, vgroup: usize, kind: u8) -> PeerKey {
        PeerKey::new(self.vgroups[vgroup].private_ip, RPC_PORT, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vgroups_spread_evenly() {
        let cluster = Cluster::build(3, 2, 6).unwrap();
        assert_eq!(cluster.vgroups.len(), 6);
        for dnode in &cluster.dnodes {
            assert_eq!(dnode.open_vnodes, 2);
        }
    }

    #[test]
    fn test_overcommit_fails() {
        let err = Cluster::build(2, 1, 3).err().unwrap();
        assert!(format!("{:#}", err).contains("vgroup 2"));
    }

    #[test]
    fn test_peer_uses_private_ip() {
        let cluster = Cluster::build(1, 4, 1).unwrap();
        assert_eq!(cluster.peer(0, 1), PeerKey::new(0x0A00_0001, RPC_PORT, 1));
    }
}
