//! Thread placement hint
//!
//! With `numa_hint` set, workers pin themselves round-robin to online
//! CPUs. A hint only: failure is logged at debug level and ignored, and
//! platforms without `sched_setaffinity` get a no-op.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Pin the calling thread to `cpu` modulo the online CPU count.
        pub fn pin_current_thread(cpu: usize) -> bool {
            let online = available_cpus();
            let target = cpu % online;
            unsafe {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut set);
                libc::CPU_SET(target, &mut set);
                libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
            }
        }
    } else {
        pub fn pin_current_thread(_cpu: usize) -> bool {
            false
        }
    }
}

/// Online CPU count, at least 1.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
