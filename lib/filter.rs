//! Pruning of negligible auxiliary density matrices.
//!
//! Left alone, every member of the hierarchy carries a nonzero matrix and the
//! cost of each step scales with the full combinatorial size of the
//! hierarchy. Periodically discarding members whose entries are all below a
//! tolerance trades a small truncation error for a much smaller working set.

use log::debug;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::stack::{ AdoStack, ZeroMask };

/// Largest absolute value of any element of `rho`.
pub fn ado_magnitude<S>(rho: &nd::ArrayBase<S, nd::Ix2>) -> f64
where S: nd::Data<Elem = C64>
{
    rho.iter().map(|a| a.norm()).fold(0.0, f64::max)
}

/// Return `true` if the filter should run before step `step`, given that it
/// runs once every `every` steps.
///
/// The first pass happens at step 1, after the auxiliaries have had one step
/// to pick up a nonzero value; step 0 is never filtered.
pub fn filter_due(step: usize, every: usize) -> bool {
    every > 0 && step >= 1 && (step - 1) % every == 0
}

/// Zero every auxiliary (ordinal > 0) whose largest element is strictly below
/// `tolerance`, and return the mask of zeroed ordinals.
///
/// The physical density matrix is never touched. A tolerance of zero never
/// zeroes anything.
pub fn filter(rho: &mut AdoStack, tolerance: f64) -> ZeroMask {
    let mut zero = ZeroMask::none(rho.len());
    for n in 1..rho.len() {
        if ado_magnitude(&rho.ado(n)) < tolerance {
            rho.ado_mut(n).fill(C64::zero());
            zero.set_zero(n, true);
        }
    }
    debug!(
        "filter: {} of {} auxiliaries zeroed",
        zero.num_zero(), rho.len().saturating_sub(1),
    );
    zero
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> AdoStack {
        let ados: Vec<nd::Array2<C64>>
            = [1.0, 1e-3, 1e-8, 0.0, 2e-6].iter()
            .map(|&x| nd::Array2::from_elem((2, 2), C64::new(0.0, x)))
            .collect();
        AdoStack::pack(&ados).unwrap()
    }

    #[test]
    fn high_tolerance_zeroes_every_auxiliary() {
        let mut rho = stack();
        let physical = rho.physical().to_owned();
        let zero = filter(&mut rho, 10.0);
        assert_eq!(zero.num_zero(), 4);
        assert!(zero.is_active(0));
        assert_eq!(rho.physical(), physical);
        assert!((1..5).all(|n| ado_magnitude(&rho.ado(n)) == 0.0));
    }

    #[test]
    fn zero_tolerance_keeps_everything() {
        let mut rho = stack();
        let before = rho.clone();
        let zero = filter(&mut rho, 0.0);
        assert_eq!(zero.num_zero(), 0);
        assert_eq!(rho, before);
    }

    #[test]
    fn intermediate_tolerance() {
        let mut rho = stack();
        let zero = filter(&mut rho, 1e-6);
        assert_eq!(zero.zeroed().collect::<Vec<_>>(), vec![2, 3]);
        assert!(ado_magnitude(&rho.ado(4)) > 0.0);
    }

    #[test]
    fn schedule() {
        let due: Vec<usize> = (0..25).filter(|&s| filter_due(s, 10)).collect();
        assert_eq!(due, vec![1, 11, 21]);
        assert!((1..5).all(|s| filter_due(s, 1)));
        assert!(!filter_due(0, 1));
        assert!(!filter_due(3, 0));
    }
}
