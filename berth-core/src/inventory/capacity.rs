//! Capacity queries over the in-memory inventory

use super::{InMemoryInventory, InventoryState};
use crate::capacity::{CapacityRequest, CapacityType, HostCapacity, OvercommitRatios};
use crate::query::{CapacityQuery, CapacityRanking, CapacityScope};
use crate::types::{Cluster, ClusterId, DataCenterId, Host, HostId, PodId};
use std::collections::HashMap;

impl InventoryState {
    /// Hosts that count toward capacity: up, enabled and not reserved for HA
    fn capacity_hosts<'a>(&'a self, cluster: &'a Cluster) -> impl Iterator<Item = &'a Host> + 'a {
        self.hosts
            .values()
            .filter(move |h| h.cluster_id == cluster.id && h.is_up() && h.is_enabled() && !h.ha_host)
    }

    fn clusters_in(&self, scope: CapacityScope) -> impl Iterator<Item = &Cluster> {
        self.clusters.values().filter(move |c| match scope {
            CapacityScope::Zone(dc) => c.data_center_id == dc,
            CapacityScope::Pod(pod) => c.pod_id == pod,
        })
    }

    fn cluster_fits(&self, cluster: &Cluster, request: CapacityRequest) -> bool {
        let ratios = OvercommitRatios::from(cluster);
        self.capacity_hosts(cluster)
            .any(|h| self.capacity_of(h).has_capacity(request, false, ratios, true))
    }

    fn cluster_free(&self, cluster: &Cluster, kind: CapacityType) -> u64 {
        let ratio = match kind {
            CapacityType::Cpu => cluster.cpu_overcommit_ratio,
            CapacityType::Memory => cluster.memory_overcommit_ratio,
        };
        self.capacity_hosts(cluster)
            .map(|h| self.capacity_of(h).record(kind).free(ratio, true))
            .sum()
    }
}

fn rank(mut entries: Vec<(u64, u64)>) -> CapacityRanking {
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    CapacityRanking {
        ordered: entries.iter().map(|(id, _)| *id).collect(),
        capacity: entries
            .into_iter()
            .map(|(id, free)| (id, free as f64))
            .collect::<HashMap<_, _>>(),
    }
}

impl CapacityQuery for InMemoryInventory {
    fn host_capacity(&self, host: HostId) -> Option<HostCapacity> {
        let state = self.state.read();
        state.hosts.get(&host).map(|h| state.capacity_of(h))
    }

    fn list_clusters_with_enough_host_capacity(
        &self,
        scope: CapacityScope,
        request: CapacityRequest,
    ) -> Vec<ClusterId> {
        let state = self.state.read();
        state
            .clusters_in(scope)
            .filter(|c| state.cluster_fits(c, request))
            .map(|c| c.id)
            .collect()
    }

    fn order_clusters_by_aggregate_capacity(
        &self,
        scope: CapacityScope,
        kind: CapacityType,
    ) -> CapacityRanking {
        let state = self.state.read();
        rank(
            state
                .clusters_in(scope)
                .map(|c| (c.id, state.cluster_free(c, kind)))
                .collect(),
        )
    }

    fn list_clusters_crossing_threshold(
        &self,
        kind: CapacityType,
        dc: DataCenterId,
        threshold: f64,
        requested: u64,
    ) -> Vec<ClusterId> {
        let state = self.state.read();
        state
            .clusters_in(CapacityScope::Zone(dc))
            .filter(|cluster| {
                let (ratio, limit) = match kind {
                    CapacityType::Cpu => (
                        cluster.cpu_overcommit_ratio,
                        cluster.cpu_disable_threshold.unwrap_or(threshold),
                    ),
                    CapacityType::Memory => (
                        cluster.memory_overcommit_ratio,
                        cluster.memory_disable_threshold.unwrap_or(threshold),
                    ),
                };
                let (total, taken) = state.capacity_hosts(cluster).fold((0u64, 0u64), |acc, h| {
                    let capacity = state.capacity_of(h);
                    let record = capacity.record(kind);
                    (
                        acc.0 + record.effective_total(ratio),
                        acc.1 + record.used + record.reserved,
                    )
                });
                total > 0 && (taken + requested) as f64 / total as f64 > limit
            })
            .map(|c| c.id)
            .collect()
    }

    fn list_pods_with_enough_host_capacity(
        &self,
        dc: DataCenterId,
        request: CapacityRequest,
    ) -> Vec<PodId> {
        let state = self.state.read();
        state
            .pods
            .values()
            .filter(|p| p.data_center_id == dc)
            .filter(|p| {
                state
                    .clusters_in(CapacityScope::Pod(p.id))
                    .any(|c| state.cluster_fits(c, request))
            })
            .map(|p| p.id)
            .collect()
    }

    fn order_pods_by_aggregate_capacity(
        &self,
        dc: DataCenterId,
        kind: CapacityType,
    ) -> CapacityRanking {
        let state = self.state.read();
        rank(
            state
                .pods
                .values()
                .filter(|p| p.data_center_id == dc)
                .map(|p| {
                    let free = state
                        .clusters_in(CapacityScope::Pod(p.id))
                        .map(|c| state.cluster_free(c, kind))
                        .sum();
                    (p.id, free)
                })
                .collect(),
        )
    }

    fn list_hosts_with_enough_capacity(
        &self,
        request: CapacityRequest,
        cluster: ClusterId,
    ) -> Vec<HostId> {
        let state = self.state.read();
        let Some(cluster) = state.clusters.get(&cluster) else {
            return Vec::new();
        };
        let ratios = OvercommitRatios::from(cluster);
        state
            .capacity_hosts(cluster)
            .filter(|h| state.capacity_of(h).has_capacity(request, false, ratios, true))
            .map(|h| h.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::CapacityRecord;
    use crate::config::StorageConfig;
    use crate::inventory::InventorySnapshot;

    fn inventory() -> InMemoryInventory {
        let yaml = r#"
pods:
  - { id: 1, name: pod1, data_center_id: 1 }
  - { id: 2, name: pod2, data_center_id: 1 }
clusters:
  - { id: 10, name: c10, data_center_id: 1, pod_id: 1 }
  - { id: 20, name: c20, data_center_id: 1, pod_id: 2, cpu_disable_threshold: 0.95 }
hosts:
  - { id: 1, uuid: h1, name: h1, data_center_id: 1, pod_id: 1, cluster_id: 10, cpus: 2, cpu_speed_mhz: 1000, total_memory_mb: 2048 }
  - { id: 2, uuid: h2, name: h2, data_center_id: 1, pod_id: 2, cluster_id: 20, cpus: 4, cpu_speed_mhz: 1000, total_memory_mb: 4096 }
"#;
        InMemoryInventory::from_snapshot(
            InventorySnapshot::from_yaml_str(yaml).unwrap(),
            StorageConfig::default(),
        )
    }

    #[test]
    fn test_cluster_ranking_by_free_capacity() {
        let inventory = inventory();
        let ranking = inventory.order_clusters_by_aggregate_capacity(CapacityScope::Zone(1), CapacityType::Cpu);
        assert_eq!(ranking.ordered, vec![20, 10]);
        assert_eq!(ranking.capacity[&20], 4000.0);

        let pods = inventory.order_pods_by_aggregate_capacity(1, CapacityType::Memory);
        assert_eq!(pods.ordered, vec![2, 1]);
    }

    #[test]
    fn test_enough_capacity_requires_one_host_with_both() {
        let inventory = inventory();
        let request = CapacityRequest {
            cpu_mhz: 3000,
            memory_mb: 1024,
        };
        assert_eq!(
            inventory.list_clusters_with_enough_host_capacity(CapacityScope::Zone(1), request),
            vec![20]
        );
        assert_eq!(inventory.list_pods_with_enough_host_capacity(1, request), vec![2]);
        assert_eq!(inventory.list_hosts_with_enough_capacity(request, 10), Vec::<HostId>::new());
    }

    #[test]
    fn test_threshold_uses_cluster_override() {
        let inventory = inventory();
        inventory.set_host_capacity(HostCapacity {
            host_id: 2,
            cpu: CapacityRecord {
                total: 4000,
                used: 3000,
                reserved: 0,
            },
            memory: CapacityRecord::new(4096),
        });

        // 3000 + 600 over 4000 is 0.9: above the global 0.85, below the
        // cluster's own 0.95.
        let crossing = inventory.list_clusters_crossing_threshold(CapacityType::Cpu, 1, 0.85, 600);
        assert!(crossing.is_empty());

        let crossing = inventory.list_clusters_crossing_threshold(CapacityType::Cpu, 1, 0.85, 1000);
        assert_eq!(crossing, vec![20]);
    }
}
