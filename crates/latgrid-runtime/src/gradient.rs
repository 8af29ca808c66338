//! Gradient accumulation
//!
//! One contiguous `f64` slab of `P x S`. Worker `i` owns the slice
//! `[i*S, (i+1)*S)` exclusively; because the slices are disjoint and all
//! writes complete before the global barrier, the write path needs no
//! locks or atomics. The reduction runs in the exclusive phase after the
//! barrier, either serially or partitioned by position across one layer.

use latgrid_core::error::{RuntimeError, RuntimeResult};

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// How per-worker slices combine into the accumulated gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReductionPolicy {
    /// Mean across worker slices (the default)
    Average,

    /// Plain sum
    Sum,

    /// Clip each slice to the given L2 norm, then average
    ClippedAverage(f64),
}

impl Default for ReductionPolicy {
    fn default() -> Self {
        ReductionPolicy::Average
    }
}

impl ReductionPolicy {
    /// Parse the `LG_REDUCTION` format: `average`, `sum`, or
    /// `clip:<max_norm>`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "average" | "avg" => Some(ReductionPolicy::Average),
            "sum" => Some(ReductionPolicy::Sum),
            _ => {
                let norm = s.strip_prefix("clip:")?.parse::<f64>().ok()?;
                (norm > 0.0).then_some(ReductionPolicy::ClippedAverage(norm))
            }
        }
    }
}

/// Exclusive handle to one worker's slice of the slab.
///
/// Handed out once per worker index; moving it into the worker thread
/// moves the write capability with it.
pub struct GradientSlice {
    ptr: *mut f64,
    len: usize,
    index: usize,
}

// Safety: each handle covers a disjoint range of the slab and is the only
// writer for that range.
unsafe impl Send for GradientSlice {}

impl GradientSlice {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        // Safety: this handle is the only writer of the range.
        unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        // Safety: exclusive by construction, see type docs.
        unsafe { core::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0.0);
    }
}

pub struct GradientAccumulator {
    slab: UnsafeCell<Box<[f64]>>,
    accum: UnsafeCell<Box<[f64]>>,
    claimed: Box<[AtomicBool]>,
    workers: usize,
    slice_len: usize,
    policy: ReductionPolicy,
}

// Safety: the slab is only written through disjoint GradientSlice handles
// before the global barrier; reductions and accum reads run in the
// exclusive phase after it. Those happens-before edges are the callers'
// contract (and the runtime's barriers provide them).
unsafe impl Sync for GradientAccumulator {}
unsafe impl Send for GradientAccumulator {}

impl GradientAccumulator {
    pub fn new(workers: usize, slice_len: usize, policy: ReductionPolicy) -> RuntimeResult<Self> {
        if workers == 0 || slice_len == 0 {
            return Err(RuntimeError::InvalidArgument(
                "gradient geometry must be non-zero",
            ));
        }
        let total = workers
            .checked_mul(slice_len)
            .ok_or(RuntimeError::AllocationFailure)?;
        Ok(Self {
            slab: UnsafeCell::new(vec![0.0; total].into_boxed_slice()),
            accum: UnsafeCell::new(vec![0.0; slice_len].into_boxed_slice()),
            claimed: (0..workers).map(|_| AtomicBool::new(false)).collect(),
            workers,
            slice_len,
            policy,
        })
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    #[inline]
    pub fn policy(&self) -> ReductionPolicy {
        self.policy
    }

    /// Claim worker `index`'s slice. Each index can be claimed once.
    pub fn claim_slice(&self, index: usize) -> RuntimeResult<GradientSlice> {
        if index >= self.workers {
            return Err(RuntimeError::InvalidArgument("worker index out of range"));
        }
        if self.claimed[index].swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::InvariantViolation(
                "gradient slice claimed twice",
            ));
        }
        let base = unsafe { (*self.slab.get()).as_mut_ptr() };
        Ok(GradientSlice {
            // Safety: index bounds checked above; ranges are disjoint.
            ptr: unsafe { base.add(index * self.slice_len) },
            len: self.slice_len,
            index,
        })
    }

    /// Zero the whole slab. Exclusive phase only.
    pub fn zero_all(&self) {
        // Safety: caller holds the exclusive phase (between steps).
        unsafe { (*self.slab.get()).fill(0.0) };
    }

    /// Reduce every parameter index. Exclusive phase only.
    pub fn reduce(&self) {
        self.reduce_partition(0, 1);
    }

    /// Reduce the parameter range belonging to `part` of `parts`,
    /// partitioning `S` evenly. Parts run concurrently from the workers
    /// of a designated layer; ranges are disjoint by construction.
    pub fn reduce_partition(&self, part: usize, parts: usize) {
        debug_assert!(parts >= 1 && part < parts);
        let chunk = self.slice_len.div_ceil(parts);
        let start = part * chunk;
        let end = ((part + 1) * chunk).min(self.slice_len);
        if start >= end {
            return;
        }

        // Safety: slice writes finished before the barrier that precedes
        // reduction; each part owns a disjoint output range.
        let slab = unsafe { &*self.slab.get() };
        let accum = unsafe { &mut *self.accum.get() };

        let scales = self.slice_scales(slab);
        for j in start..end {
            let mut sum = 0.0;
            for i in 0..self.workers {
                sum += slab[i * self.slice_len + j] * scales[i];
            }
            accum[j] = match self.policy {
                ReductionPolicy::Sum => sum,
                ReductionPolicy::Average | ReductionPolicy::ClippedAverage(_) => {
                    sum / self.workers as f64
                }
            };
        }
    }

    /// Per-slice scale factors: 1 except under clipping.
    fn slice_scales(&self, slab: &[f64]) -> Vec<f64> {
        match self.policy {
            ReductionPolicy::ClippedAverage(max_norm) => (0..self.workers)
                .map(|i| {
                    let slice = &slab[i * self.slice_len..(i + 1) * self.slice_len];
                    let norm = slice.iter().map(|g| g * g).sum::<f64>().sqrt();
                    if norm > max_norm {
                        max_norm / norm
                    } else {
                        1.0
                    }
                })
                .collect(),
            _ => vec![1.0; self.workers],
        }
    }

    /// The reduced gradient. Valid after [`reduce`](Self::reduce) and
    /// before the next step's writes begin.
    pub fn accumulated(&self) -> &[f64] {
        // Safety: exclusive phase, see type docs.
        unsafe { &*self.accum.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rejects_degenerate_geometry() {
        assert!(GradientAccumulator::new(0, 10, ReductionPolicy::Average).is_err());
        assert!(GradientAccumulator::new(10, 0, ReductionPolicy::Average).is_err());
    }

    #[test]
    fn test_slice_claimed_once() {
        let acc = GradientAccumulator::new(2, 4, ReductionPolicy::Average).unwrap();
        let _first = acc.claim_slice(0).unwrap();
        assert!(matches!(
            acc.claim_slice(0),
            Err(RuntimeError::InvariantViolation(_))
        ));
        assert!(acc.claim_slice(2).is_err());
    }

    #[test]
    fn test_average_reduction_calibration() {
        // 12 workers, S = 1000, worker i writes all-ones scaled by i+1.
        // The average is (1+2+...+12)/12 = 6.5 everywhere.
        let acc = Arc::new(GradientAccumulator::new(12, 1000, ReductionPolicy::Average).unwrap());
        let handles: Vec<_> = (0..12)
            .map(|i| {
                let mut slice = acc.claim_slice(i).unwrap();
                thread::spawn(move || {
                    slice.zero();
                    slice.as_mut_slice().fill((i + 1) as f64);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        acc.reduce();
        assert!(acc.accumulated().iter().all(|&v| (v - 6.5).abs() < 1e-12));
    }

    #[test]
    fn test_sum_reduction() {
        let acc = GradientAccumulator::new(3, 4, ReductionPolicy::Sum).unwrap();
        for i in 0..3 {
            let mut slice = acc.claim_slice(i).unwrap();
            slice.as_mut_slice().fill(2.0);
        }
        acc.reduce();
        assert!(acc.accumulated().iter().all(|&v| v == 6.0));
    }

    #[test]
    fn test_clipped_average() {
        // Slice 0 has L2 norm 2.0 against a cap of 1.0, so it is halved;
        // slice 1 is within the cap and untouched.
        let acc = GradientAccumulator::new(2, 4, ReductionPolicy::ClippedAverage(1.0)).unwrap();
        let mut s0 = acc.claim_slice(0).unwrap();
        s0.as_mut_slice().fill(1.0); // norm = 2
        let mut s1 = acc.claim_slice(1).unwrap();
        s1.as_mut_slice().fill(0.1); // norm = 0.2
        acc.reduce();
        let expected = (0.5 + 0.1) / 2.0;
        assert!(acc
            .accumulated()
            .iter()
            .all(|&v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn test_partitioned_reduce_matches_serial() {
        let acc = GradientAccumulator::new(4, 10, ReductionPolicy::Average).unwrap();
        for i in 0..4 {
            let mut slice = acc.claim_slice(i).unwrap();
            for (j, g) in slice.as_mut_slice().iter_mut().enumerate() {
                *g = (i * 10 + j) as f64;
            }
        }
        acc.reduce();
        let serial: Vec<f64> = acc.accumulated().to_vec();

        for part in 0..3 {
            acc.reduce_partition(part, 3);
        }
        assert_eq!(acc.accumulated(), &serial[..]);
    }

    #[test]
    fn test_zero_all_between_steps() {
        let acc = GradientAccumulator::new(2, 4, ReductionPolicy::Average).unwrap();
        let mut slice = acc.claim_slice(0).unwrap();
        slice.as_mut_slice().fill(5.0);
        acc.zero_all();
        assert!(slice.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(ReductionPolicy::parse("average"), Some(ReductionPolicy::Average));
        assert_eq!(ReductionPolicy::parse("SUM"), Some(ReductionPolicy::Sum));
        assert_eq!(
            ReductionPolicy::parse("clip:2.5"),
            Some(ReductionPolicy::ClippedAverage(2.5))
        );
        assert_eq!(ReductionPolicy::parse("clip:-1"), None);
        assert_eq!(ReductionPolicy::parse("bogus"), None);
    }
}
