// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Tuner resource pools, one per broadcast [`data::System`].
//!
//! Borrowing and releasing happens only on the worker's main loop thread, so
//! this holds no lock of its own; the scheduler's admission test only needs
//! [`Pools::available`], while the supervisor calls [`Pools::borrow`] and
//! [`Pools::release`] as jobs start and are reaped.

use std::collections::BTreeSet;

use data::System;

/// A specific physical tuner instance, identified by the integer the
/// configuration assigns it within its system's pool.
pub type Assignment = u32;

struct Pool {
    /// Assignments not currently lent out.
    free: BTreeSet<Assignment>,
    size: usize,
}

impl Pool {
    fn new(size: usize) -> Self {
        Pool {
            free: (0..size as u32).collect(),
            size,
        }
    }
}

/// Per-system tuner pools. Sizes come from configuration (see
/// [`crate::worker::WorkerConfig`]'s `terrestrial_pool_size`/
/// `satellite_pool_size`); the reference deployment uses one assignment per
/// system.
pub struct Pools {
    terrestrial: Pool,
    satellite: Pool,
}

impl Pools {
    pub fn new(terrestrial_size: usize, satellite_size: usize) -> Self {
        Pools {
            terrestrial: Pool::new(terrestrial_size),
            satellite: Pool::new(satellite_size),
        }
    }

    fn pool(&self, system: System) -> &Pool {
        match system {
            System::Terrestrial => &self.terrestrial,
            System::Satellite => &self.satellite,
        }
    }

    fn pool_mut(&mut self, system: System) -> &mut Pool {
        match system {
            System::Terrestrial => &mut self.terrestrial,
            System::Satellite => &mut self.satellite,
        }
    }

    /// Number of free assignments for `system`, for the scheduler's greedy
    /// admission test.
    pub fn available(&self, system: System) -> usize {
        self.pool(system).free.len()
    }

    /// Total pool size for `system`, regardless of current use.
    pub fn size(&self, system: System) -> usize {
        self.pool(system).size
    }

    /// Borrows `count` free assignments from `system`'s pool, or returns
    /// `None` (and borrows nothing) if fewer than `count` are free.
    pub fn borrow(&mut self, system: System, count: usize) -> Option<Vec<Assignment>> {
        let pool = self.pool_mut(system);
        if pool.free.len() < count {
            return None;
        }
        let taken: Vec<Assignment> = pool.free.iter().take(count).copied().collect();
        for a in &taken {
            pool.free.remove(a);
        }
        Some(taken)
    }

    /// Returns previously-borrowed assignments to `system`'s pool.
    pub fn release(&mut self, system: System, assignments: &[Assignment]) {
        let pool = self.pool_mut(system);
        for a in assignments {
            debug_assert!(*a < pool.size as u32, "releasing out-of-range assignment");
            pool.free.insert(*a);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_exhausts_then_blocks() {
        let mut pools = Pools::new(2, 1);
        assert_eq!(pools.available(System::Terrestrial), 2);
        let a = pools.borrow(System::Terrestrial, 1).unwrap();
        assert_eq!(pools.available(System::Terrestrial), 1);
        let b = pools.borrow(System::Terrestrial, 1).unwrap();
        assert_eq!(pools.available(System::Terrestrial), 0);
        assert!(pools.borrow(System::Terrestrial, 1).is_none());
        assert_ne!(a, b);

        pools.release(System::Terrestrial, &a);
        assert_eq!(pools.available(System::Terrestrial), 1);
    }

    #[test]
    fn pools_are_independent_per_system() {
        let mut pools = Pools::new(1, 1);
        pools.borrow(System::Terrestrial, 1).unwrap();
        assert_eq!(pools.available(System::Satellite), 1);
    }

    #[test]
    fn borrow_all_or_nothing() {
        let mut pools = Pools::new(1, 0);
        assert!(pools.borrow(System::Terrestrial, 2).is_none());
        assert_eq!(pools.available(System::Terrestrial), 1);
    }
}
