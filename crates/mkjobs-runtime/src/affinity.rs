//! Processor topology detection and CPU affinity
//!
//! On Linux the topology is the set of NUMA nodes from sysfs, restricted
//! to the CPUs this process may run on. Elsewhere every processor goes in
//! one group. Affinity failures are never fatal: sandboxes and containers
//! often forbid them.

use mkjobs_core::{kdebug, Topology};
use nix::errno::Errno;

fn available_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use mkjobs_core::topology::parse_cpu_list;
        use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        const NODE_DIR: &str = "/sys/devices/system/node";

        /// A set of CPUs a thread or process may run on
        #[derive(Clone, Copy)]
        pub struct CpuMask {
            set: CpuSet,
        }

        impl CpuMask {
            pub fn from_cpus(cpus: &[usize]) -> Self {
                let mut set = CpuSet::new();
                for &cpu in cpus {
                    // Out-of-range CPUs are dropped
                    let _ = set.set(cpu);
                }
                Self { set }
            }

            pub fn contains(&self, cpu: usize) -> bool {
                self.set.is_set(cpu).unwrap_or(false)
            }
        }

        /// Restrict the calling thread to `mask`
        pub fn pin_current_thread(mask: &CpuMask) -> Result<(), Errno> {
            sched_setaffinity(Pid::from_raw(0), &mask.set)
        }

        fn allowed_cpus() -> Vec<usize> {
            match sched_getaffinity(Pid::from_raw(0)) {
                Ok(set) => (0..CpuSet::count())
                    .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
                    .collect(),
                Err(_) => Vec::new(),
            }
        }

        fn numa_nodes() -> Vec<(usize, Vec<usize>)> {
            let mut nodes = Vec::new();
            let entries = match std::fs::read_dir(NODE_DIR) {
                Ok(entries) => entries,
                Err(_) => return nodes,
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let id = match name.to_str().and_then(|n| n.strip_prefix("node")) {
                    Some(rest) => match rest.parse::<usize>() {
                        Ok(id) => id,
                        Err(_) => continue,
                    },
                    None => continue,
                };
                if let Ok(list) = std::fs::read_to_string(entry.path().join("cpulist")) {
                    nodes.push((id, parse_cpu_list(&list)));
                }
            }
            nodes.sort_by_key(|(id, _)| *id);
            nodes
        }

        /// Processor groups visible to this process
        pub fn detect_topology() -> Topology {
            let allowed = allowed_cpus();
            let groups: Vec<Vec<usize>> = numa_nodes()
                .into_iter()
                .map(|(_, cpus)| {
                    if allowed.is_empty() {
                        cpus
                    } else {
                        cpus.into_iter().filter(|c| allowed.contains(c)).collect()
                    }
                })
                .filter(|cpus: &Vec<usize>| !cpus.is_empty())
                .collect();

            let topology = if !groups.is_empty() {
                Topology::new(groups)
            } else if !allowed.is_empty() {
                Topology::new(vec![allowed])
            } else {
                Topology::single(available_cpus())
            };
            kdebug!(
                "topology: {} group(s), {} processor(s)",
                topology.group_count(),
                topology.total_processors()
            );
            topology
        }

        /// Runs in the forked child before exec; async-signal-safe calls only
        pub(crate) fn configure_child(mask: Option<&CpuMask>, nice: Option<i32>) {
            if let Some(mask) = mask {
                let _ = sched_setaffinity(Pid::from_raw(0), &mask.set);
            }
            if let Some(nice) = nice {
                unsafe {
                    libc::setpriority(libc::PRIO_PROCESS, 0, nice);
                }
            }
        }
    } else {
        /// Placeholder mask: affinity is not applied on this platform
        #[derive(Clone, Copy)]
        pub struct CpuMask;

        impl CpuMask {
            pub fn from_cpus(_cpus: &[usize]) -> Self {
                CpuMask
            }

            pub fn contains(&self, _cpu: usize) -> bool {
                true
            }
        }

        pub fn pin_current_thread(_mask: &CpuMask) -> Result<(), Errno> {
            Ok(())
        }

        pub fn detect_topology() -> Topology {
            let topology = Topology::single(available_cpus());
            kdebug!("topology: single group of {}", topology.total_processors());
            topology
        }

        pub(crate) fn configure_child(_mask: Option<&CpuMask>, nice: Option<i32>) {
            if let Some(nice) = nice {
                unsafe {
                    libc::setpriority(libc::PRIO_PROCESS, 0, nice);
                }
            }
        }
    }
}
