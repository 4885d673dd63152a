//! Weighted round-robin GPU scheduler.
//!
//! Tracks one slot per physical device. [`GpuScheduler::pick_one`]
//! implements weighted round-robin over the remaining per-slot budgets;
//! [`GpuScheduler::distribute`] splits an image count across available
//! slots proportionally to their configured weights.
//!
//! All state lives behind a single mutex; every operation is O(N) in the
//! number of GPUs and holds the lock without suspending.

use std::sync::Mutex;

use serde::Serialize;

use crate::gpu_config::GpuConfigFile;
use crate::types::DeviceId;

/// Snapshot of one GPU slot.
#[derive(Debug, Clone, Serialize)]
pub struct GpuSlot {
    pub device: DeviceId,
    pub name: String,
    pub weight: u32,
    /// Advisory port for the worker bound to this slot.
    pub port: u16,
    pub busy: bool,
    /// Remaining round-robin budget, always in `0..=weight`.
    pub current_weight: u32,
}

/// One sub-task assignment produced by [`GpuScheduler::distribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub device: DeviceId,
    pub image_count: u32,
}

struct SlotState {
    device: DeviceId,
    name: String,
    weight: u32,
    port: u16,
    busy: bool,
    current_weight: u32,
}

/// Scheduler over the configured GPU slot table.
pub struct GpuScheduler {
    multi_enabled: bool,
    distribute_enabled: bool,
    slots: Mutex<Vec<SlotState>>,
}

impl GpuScheduler {
    /// Build the slot table from a loaded GPU configuration.
    ///
    /// Advisory worker ports are assigned sequentially from `base_port`
    /// in declaration order.
    pub fn new(config: &GpuConfigFile, base_port: u16) -> Self {
        let slots = config
            .gpus
            .iter()
            .enumerate()
            .map(|(i, gpu)| SlotState {
                device: gpu.device,
                name: gpu.display_name(),
                weight: gpu.weight.max(1),
                port: base_port.wrapping_add(i as u16),
                busy: false,
                current_weight: gpu.weight.max(1),
            })
            .collect();

        Self {
            multi_enabled: config.enabled,
            distribute_enabled: config.distribute,
            slots: Mutex::new(slots),
        }
    }

    /// Whether multi-GPU mode is enabled in the configuration.
    pub fn multi_enabled(&self) -> bool {
        self.multi_enabled
    }

    /// Number of configured slots.
    pub fn gpu_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Snapshot of every slot, in declaration order.
    pub fn slots(&self) -> Vec<GpuSlot> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .map(|s| GpuSlot {
                device: s.device,
                name: s.name.clone(),
                weight: s.weight,
                port: s.port,
                busy: s.busy,
                current_weight: s.current_weight,
            })
            .collect()
    }

    /// Pick the next device by weighted round-robin.
    ///
    /// Prefers the non-busy slot with the highest remaining budget; when
    /// every slot is busy, falls back to the highest budget regardless.
    /// Ties resolve to the first-declared slot. The chosen slot's budget
    /// is decremented, and all budgets refill once every one reaches 0.
    pub fn pick_one(&self) -> Option<DeviceId> {
        let mut slots = self.slots.lock().unwrap();
        if slots.is_empty() {
            return None;
        }

        let best = |pred: &dyn Fn(&SlotState) -> bool| -> Option<usize> {
            let mut best_idx = None;
            let mut best_weight = 0u32;
            for (i, s) in slots.iter().enumerate() {
                if pred(s) && (best_idx.is_none() || s.current_weight > best_weight) {
                    best_idx = Some(i);
                    best_weight = s.current_weight;
                }
            }
            best_idx
        };

        let idx = best(&|s| !s.busy).or_else(|| best(&|_| true))?;

        slots[idx].current_weight = slots[idx].current_weight.saturating_sub(1);
        if slots.iter().all(|s| s.current_weight == 0) {
            for s in slots.iter_mut() {
                s.current_weight = s.weight;
            }
        }

        Some(slots[idx].device)
    }

    /// Split `total_images` across slots proportionally to weight.
    ///
    /// Candidates are the non-busy slots (all slots when none is free).
    /// With distribution disabled, a single image, or a single candidate,
    /// everything goes to the highest-weighted candidate. Otherwise each
    /// of the first N-1 candidates gets `floor(total * weight / sum)` and
    /// the last gets the remainder; zero-count assignments are dropped.
    /// The returned counts always sum to `total_images`.
    pub fn distribute(&self, total_images: u32) -> Vec<Assignment> {
        let slots = self.slots.lock().unwrap();
        if slots.is_empty() || total_images == 0 {
            return Vec::new();
        }

        let available: Vec<&SlotState> = slots.iter().filter(|s| !s.busy).collect();
        let candidates: Vec<&SlotState> = if available.is_empty() {
            slots.iter().collect()
        } else {
            available
        };

        if !self.distribute_enabled || total_images <= 1 || candidates.len() == 1 {
            // Highest configured weight wins; first-declared on ties.
            let best = candidates
                .iter()
                .fold(None::<&&SlotState>, |acc, s| match acc {
                    Some(b) if b.weight >= s.weight => acc,
                    _ => Some(s),
                })
                .expect("candidates is non-empty");
            return vec![Assignment {
                device: best.device,
                image_count: total_images,
            }];
        }

        let total_weight: u64 = candidates.iter().map(|s| u64::from(s.weight)).sum();
        let mut assignments = Vec::with_capacity(candidates.len());
        let mut allocated = 0u32;

        for (i, slot) in candidates.iter().enumerate() {
            let count = if i + 1 == candidates.len() {
                total_images - allocated
            } else {
                (u64::from(total_images) * u64::from(slot.weight) / total_weight) as u32
            };
            allocated += count;
            if count > 0 {
                assignments.push(Assignment {
                    device: slot.device,
                    image_count: count,
                });
            }
        }

        assignments
    }

    /// Flip the busy flag for `device`. Unknown devices are ignored.
    pub fn mark_busy(&self, device: DeviceId, busy: bool) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.device == device) {
            slot.busy = busy;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu_config::{GpuConfigFile, GpuEntry};

    fn scheduler(weights: &[u32]) -> GpuScheduler {
        let config = GpuConfigFile {
            enabled: true,
            distribute: true,
            gpus: weights
                .iter()
                .enumerate()
                .map(|(i, &w)| GpuEntry {
                    device: i as DeviceId,
                    name: None,
                    weight: w,
                })
                .collect(),
        };
        GpuScheduler::new(&config, 9000)
    }

    fn pick_counts(s: &GpuScheduler, calls: usize) -> Vec<usize> {
        let mut counts = vec![0usize; s.gpu_count()];
        for _ in 0..calls {
            let device = s.pick_one().unwrap();
            counts[device as usize] += 1;
        }
        counts
    }

    // -- pick_one --

    #[test]
    fn pick_one_respects_weights_over_one_cycle() {
        let s = scheduler(&[3, 1]);
        assert_eq!(pick_counts(&s, 4), vec![3, 1]);
    }

    #[test]
    fn pick_one_respects_weights_over_two_cycles() {
        let s = scheduler(&[3, 1]);
        assert_eq!(pick_counts(&s, 8), vec![6, 2]);
    }

    #[test]
    fn pick_one_ties_resolve_to_first_declared() {
        let s = scheduler(&[1, 1]);
        assert_eq!(s.pick_one(), Some(0));
        assert_eq!(s.pick_one(), Some(1));
    }

    #[test]
    fn pick_one_skips_busy_slots() {
        let s = scheduler(&[3, 1]);
        s.mark_busy(0, true);
        assert_eq!(s.pick_one(), Some(1));
    }

    #[test]
    fn pick_one_falls_back_when_all_busy() {
        let s = scheduler(&[3, 1]);
        s.mark_busy(0, true);
        s.mark_busy(1, true);
        assert_eq!(s.pick_one(), Some(0));
    }

    #[test]
    fn pick_one_empty_table() {
        let s = scheduler(&[]);
        assert_eq!(s.pick_one(), None);
    }

    // -- distribute --

    #[test]
    fn distribute_weighted_split() {
        let s = scheduler(&[3, 1]);
        let got = s.distribute(8);
        assert_eq!(
            got,
            vec![
                Assignment { device: 0, image_count: 6 },
                Assignment { device: 1, image_count: 2 },
            ]
        );
    }

    #[test]
    fn distribute_equal_weights_remainder_to_last() {
        let s = scheduler(&[1, 1, 1]);
        let got = s.distribute(10);
        assert_eq!(
            got,
            vec![
                Assignment { device: 0, image_count: 3 },
                Assignment { device: 1, image_count: 3 },
                Assignment { device: 2, image_count: 4 },
            ]
        );
    }

    #[test]
    fn distribute_single_image_goes_to_heaviest() {
        let s = scheduler(&[2, 1]);
        assert_eq!(
            s.distribute(1),
            vec![Assignment { device: 0, image_count: 1 }]
        );
    }

    #[test]
    fn distribute_skips_busy_slots() {
        let s = scheduler(&[2, 1]);
        s.mark_busy(0, true);
        assert_eq!(
            s.distribute(5),
            vec![Assignment { device: 1, image_count: 5 }]
        );
    }

    #[test]
    fn distribute_all_busy_uses_full_table() {
        let s = scheduler(&[1, 1]);
        s.mark_busy(0, true);
        s.mark_busy(1, true);
        let got = s.distribute(4);
        let total: u32 = got.iter().map(|a| a.image_count).sum();
        assert_eq!(total, 4);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn distribute_drops_zero_assignments() {
        // floor(2 * 1 / 10) = 0 for the light slot.
        let s = scheduler(&[1, 9]);
        let got = s.distribute(2);
        assert!(got.iter().all(|a| a.image_count > 0));
        let total: u32 = got.iter().map(|a| a.image_count).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn distribute_conserves_total_and_devices_unique() {
        for (weights, total) in [
            (vec![3u32, 1], 8u32),
            (vec![1, 1, 1], 10),
            (vec![5, 2, 3], 17),
            (vec![1], 9),
            (vec![2, 7], 3),
        ] {
            let s = scheduler(&weights);
            let got = s.distribute(total);
            let sum: u32 = got.iter().map(|a| a.image_count).sum();
            assert_eq!(sum, total, "weights {weights:?} total {total}");
            let mut devices: Vec<_> = got.iter().map(|a| a.device).collect();
            devices.dedup();
            assert_eq!(devices.len(), got.len());
        }
    }

    #[test]
    fn distribute_disabled_single_assignment() {
        let config = GpuConfigFile {
            enabled: true,
            distribute: false,
            gpus: vec![
                GpuEntry { device: 0, name: None, weight: 1 },
                GpuEntry { device: 1, name: None, weight: 4 },
            ],
        };
        let s = GpuScheduler::new(&config, 9000);
        assert_eq!(
            s.distribute(6),
            vec![Assignment { device: 1, image_count: 6 }]
        );
    }

    // -- mark_busy --

    #[test]
    fn mark_busy_round_trips_in_snapshot() {
        let s = scheduler(&[1, 1]);
        s.mark_busy(1, true);
        let slots = s.slots();
        assert!(!slots[0].busy);
        assert!(slots[1].busy);
        s.mark_busy(1, false);
        assert!(!s.slots()[1].busy);
    }
}
