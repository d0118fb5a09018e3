//! Enumeration of the auxiliary density matrices (ADOs) in the hierarchy and
//! the neighbor maps connecting them.
//!
//! Each ADO is labeled by a multi-index `{n_{m,k}}` over bath modes `m` and
//! Matsubara terms `k = 0, ..., KK`, with non-negative entries whose sum (the
//! *depth*) is at most `LL`. Multi-indices are assigned ordinals breadth-first:
//! ordinal 0 is the all-zero index (the physical density matrix), followed by
//! every depth-1 index, then every depth-2 index, and so on. Within a depth the
//! order is fixed by the order in which the work queue reaches each index, so
//! the same parameters always give the same ordinals.

use std::{ collections::VecDeque, hash::BuildHasherDefault };
use indexmap::IndexSet;
use itertools::Itertools;
use rustc_hash::FxHasher;
use crate::error::{ HeomError, HeomResult };

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Number of multi-indices over `ncoords` coordinates with total at most
/// `ll`, i.e. `binom(ncoords + ll, ll)`, or `None` on overflow.
pub fn count_members(ncoords: usize, ll: usize) -> Option<usize> {
    (1..=ll).try_fold(1_usize, |acc, i| {
        acc.checked_mul(ncoords.checked_add(i)?).map(|x| x / i)
    })
}

/// Hierarchy topology: multi-indices, their ordinals, and raise/lower maps.
///
/// Built once per run and never mutated.
#[derive(Clone, Debug)]
pub struct Hierarchy {
    nmodes: usize,
    kk: usize,
    ll: usize,
    members: FxIndexSet<Vec<u32>>,
    depth: Vec<usize>,
    map_sum: Vec<usize>,
    map_nplus: Vec<Option<usize>>,
    map_nneg: Vec<Option<usize>>,
}

impl Hierarchy {
    /// Enumerate the hierarchy for `nmodes` bath modes, `kk + 1` Matsubara
    /// terms per mode, and maximum depth `ll`.
    ///
    /// Fails if the number of members would overflow `usize`.
    pub fn new(nmodes: usize, kk: usize, ll: usize) -> HeomResult<Self> {
        let too_large = || HeomError::HierarchyTooLarge { nmodes, kk, ll };
        let ncoords = nmodes.checked_mul(kk + 1).ok_or_else(too_large)?;
        let total = count_members(ncoords, ll).ok_or_else(too_large)?;
        // the per-member neighbor tables must also fit
        total.checked_mul(ncoords.max(1)).ok_or_else(too_large)?;

        let mut members: FxIndexSet<Vec<u32>>
            = FxIndexSet::with_capacity_and_hasher(total, Default::default());
        let mut depth: Vec<usize> = Vec::with_capacity(total);
        let mut map_sum: Vec<usize> = vec![0; ll + 1];

        // each multi-index is reached exactly once by only ever raising
        // coordinates at or after the last one raised
        let mut queue: VecDeque<(Vec<u32>, usize, usize)> = VecDeque::new();
        queue.push_back((vec![0; ncoords], 0, 0));
        while let Some((index, last, d)) = queue.pop_front() {
            if d < ll {
                for c in last..ncoords {
                    let mut child = index.clone();
                    child[c] += 1;
                    queue.push_back((child, c, d + 1));
                }
            }
            members.insert(index);
            depth.push(d);
            map_sum[d] += 1;
        }

        let mut map_nplus: Vec<Option<usize>>
            = Vec::with_capacity(total * ncoords);
        let mut map_nneg: Vec<Option<usize>>
            = Vec::with_capacity(total * ncoords);
        let mut neighbor: Vec<u32> = vec![0; ncoords];
        for (index, &d) in members.iter().zip(&depth) {
            for c in 0..ncoords {
                neighbor.copy_from_slice(index);
                neighbor[c] += 1;
                map_nplus.push(
                    (d < ll).then(|| members.get_index_of(&neighbor))
                        .flatten()
                );
                map_nneg.push(
                    (index[c] > 0).then(|| {
                        neighbor[c] -= 2;
                        members.get_index_of(&neighbor)
                    })
                    .flatten()
                );
            }
        }

        Ok(Self { nmodes, kk, ll, members, depth, map_sum, map_nplus, map_nneg })
    }

    /// Total number of members, `nn_tot + 1`.
    pub fn len(&self) -> usize { self.members.len() }

    /// Always `false`: the physical density matrix is always present.
    pub fn is_empty(&self) -> bool { self.members.is_empty() }

    /// Largest ordinal.
    pub fn nn_tot(&self) -> usize { self.len() - 1 }

    /// Number of bath modes.
    pub fn nmodes(&self) -> usize { self.nmodes }

    /// Index of the last Matsubara term.
    pub fn kk(&self) -> usize { self.kk }

    /// Maximum depth.
    pub fn ll(&self) -> usize { self.ll }

    /// Number of Matsubara terms per mode, `KK + 1`.
    pub fn nmats(&self) -> usize { self.kk + 1 }

    /// Number of coordinates in each multi-index.
    pub fn ncoords(&self) -> usize { self.nmodes * (self.kk + 1) }

    /// Flat coordinate of mode `m`, Matsubara term `k`.
    pub fn coord(&self, m: usize, k: usize) -> usize { m * (self.kk + 1) + k }

    /// Multi-index of ordinal `n`, flattened mode-major.
    ///
    /// *Panics* if `n` is out of range.
    pub fn index(&self, n: usize) -> &[u32] {
        self.members.get_index(n)
            .expect("Hierarchy::index: ordinal out of range")
    }

    /// Excitation count of ordinal `n` in mode `m`, Matsubara term `k`.
    pub fn count(&self, n: usize, m: usize, k: usize) -> u32 {
        self.index(n)[self.coord(m, k)]
    }

    /// Ordinal of a multi-index, if it belongs to the hierarchy.
    pub fn ordinal_of(&self, index: &[u32]) -> Option<usize> {
        self.members.get_index_of(index)
    }

    /// Total excitation of ordinal `n`.
    pub fn depth(&self, n: usize) -> usize { self.depth[n] }

    /// Number of members at each depth `0..=LL`.
    pub fn map_sum(&self) -> &[usize] { &self.map_sum }

    /// Iterate over `(ordinal, multi-index)` pairs in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u32])> + '_ {
        self.members.iter().map(|v| v.as_slice()).enumerate()
    }

    /// Ordinal reached by raising coordinate `(m, k)` of ordinal `n`, or `None`
    /// if that would exceed the maximum depth.
    pub fn raise(&self, n: usize, m: usize, k: usize) -> Option<usize> {
        self.map_nplus[n * self.ncoords() + self.coord(m, k)]
    }

    /// Ordinal reached by lowering coordinate `(m, k)` of ordinal `n`, or
    /// `None` if that coordinate is already zero.
    pub fn lower(&self, n: usize, m: usize, k: usize) -> Option<usize> {
        self.map_nneg[n * self.ncoords() + self.coord(m, k)]
    }

    /// All `(m, k)` coordinate pairs, mode-major.
    pub fn coords(&self) -> impl Iterator<Item = (usize, usize)> {
        (0..self.nmodes).cartesian_product(0..self.kk + 1)
    }
}
