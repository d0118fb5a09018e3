//! Right-hand side of the hierarchical equations of motion.
//!
//! For ordinal `n` with counts `n_{m,k}` and total damping rate
//! `W_n = \sum_{m,k} n_{m,k} \nu_k`, the derivative is
//! ```text
//! d/dt ρ_n = -i [H, ρ_n] - W_n ρ_n
//!     - i \sum_{m,k} a_{m,k} [V_m, ρ_{n+e_{mk}}]
//!     - i \sum_{m,k} b_{m,k} (c_k V_m ρ_{n-e_{mk}} - c_k^* ρ_{n-e_{mk}} V_m)
//! ```
//! where `a = 1`, `b = n_{m,k}` for the plain hierarchy and
//! `a = sqrt((n_{m,k} + 1) |c_k|)`, `b = sqrt(n_{m,k} / |c_k|)` for the scaled
//! hierarchy of Shi et al., J. Chem. Phys. 130, 084105 (2009).
//!
//! With truncation enabled (Ishizaki and Tanimura, J. Phys. Soc. Jpn. 74,
//! 3131 (2005)) two corrections are added. Every ordinal gets the white-noise
//! contribution of the dropped Matsubara terms,
//! ```text
//! -Δ \sum_m [V_m, [V_m, ρ_n]]
//! ```
//! (see [`BathParams::residual`]), and every ordinal at the maximum depth has
//! its missing deeper neighbors replaced by their steady-state estimate,
//! giving
//! ```text
//! -\sum_{m,k} (n_{m,k} + 1) / (W_n + \nu_k) [V_m, c_k V_m ρ_n - c_k^* ρ_n V_m]
//! ```
//! which is identical in the plain and scaled hierarchies.

use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rayon::iter::{ IntoParallelIterator, ParallelIterator };
use crate::{
    bath::BathParams,
    config::RunParams,
    error::{ HeomError, HeomResult },
    hierarchy::Hierarchy,
    stack::ZeroMask,
};

/// Compute the commutator `[A, B] = A B - B A`.
pub fn commutator<SA, SB>(
    A: &nd::ArrayBase<SA, nd::Ix2>,
    B: &nd::ArrayBase<SB, nd::Ix2>,
) -> nd::Array2<C64>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    A.dot(B) - B.dot(A)
}

/// Compute `c V ρ - c^* ρ V`, the bath-weighted combination entering the
/// downward coupling.
///
/// For real `c` this is `c [V, ρ]`; for imaginary `c` it is `c {V, ρ}`.
pub fn weighted_product<SV, SR>(
    c: C64,
    V: &nd::ArrayBase<SV, nd::Ix2>,
    rho: &nd::ArrayBase<SR, nd::Ix2>,
) -> nd::Array2<C64>
where
    SV: nd::Data<Elem = C64>,
    SR: nd::Data<Elem = C64>,
{
    c * V.dot(rho) - c.conj() * rho.dot(V)
}

/// Evaluates the time derivative of every auxiliary density matrix.
///
/// Holds only shared references and precomputed constants, so evaluation is a
/// pure function of the state passed in; Runge-Kutta stages can call it
/// repeatedly without interfering with each other.
#[derive(Clone, Debug)]
pub struct HeomRhs<'a> {
    H: &'a nd::Array2<C64>,
    couplings: &'a [nd::Array2<C64>],
    bath: &'a BathParams,
    hierarchy: &'a Hierarchy,
    do_truncate: bool,
    do_scale: bool,
    skip_filtered: bool,
    residual: f64,
    rates: Vec<f64>,
}

impl<'a> HeomRhs<'a> {
    /// Create a new `HeomRhs`.
    ///
    /// Fails if the number of coupling operators differs from the number of
    /// bath modes in `hierarchy`, if `bath` holds a different number of
    /// Matsubara terms, or if any operator does not match `H`.
    pub fn new(
        H: &'a nd::Array2<C64>,
        couplings: &'a [nd::Array2<C64>],
        bath: &'a BathParams,
        hierarchy: &'a Hierarchy,
        params: &RunParams,
    ) -> HeomResult<Self>
    {
        let (rows, cols) = H.dim();
        if rows != cols {
            return Err(HeomError::NotSquare { name: "hamiltonian", rows, cols });
        }
        if couplings.len() != hierarchy.nmodes() {
            return Err(HeomError::DimensionMismatch {
                name: "el-phonon coupling list",
                expected: hierarchy.nmodes(),
                found: couplings.len(),
            });
        }
        if bath.len() != hierarchy.nmats() {
            return Err(HeomError::DimensionMismatch {
                name: "Matsubara term list",
                expected: hierarchy.nmats(),
                found: bath.len(),
            });
        }
        if let Some(V) = couplings.iter().find(|V| V.dim() != (rows, rows)) {
            return Err(HeomError::DimensionMismatch {
                name: "el-phonon coupling",
                expected: rows,
                found: V.nrows(),
            });
        }
        let rates: Vec<f64>
            = (0..hierarchy.len())
            .map(|n| {
                hierarchy.coords()
                    .map(|(m, k)| {
                        hierarchy.count(n, m, k) as f64
                            * bath.gamma_matsubara[k]
                    })
                    .sum()
            })
            .collect();
        Ok(Self {
            H,
            couplings,
            bath,
            hierarchy,
            do_truncate: params.do_truncate,
            do_scale: params.do_scale,
            skip_filtered: params.skip_filtered,
            residual: bath.residual(),
            rates,
        })
    }

    /// Electronic dimension.
    pub fn nstates(&self) -> usize { self.H.nrows() }

    /// Number of ordinals.
    pub fn len(&self) -> usize { self.hierarchy.len() }

    /// Always `false`.
    pub fn is_empty(&self) -> bool { self.hierarchy.is_empty() }

    // upward coefficient a_{m,k}
    fn raise_coeff(&self, count: u32, c: C64) -> f64 {
        if self.do_scale {
            ((count as f64 + 1.0) * c.norm()).sqrt()
        } else {
            1.0
        }
    }

    // downward coefficient b_{m,k}; `None` when the term vanishes
    fn lower_coeff(&self, count: u32, c: C64) -> Option<f64> {
        if self.do_scale {
            let cabs = c.norm();
            (cabs > 0.0).then(|| (count as f64 / cabs).sqrt())
        } else {
            Some(count as f64)
        }
    }

    fn check_shapes(&self, rho: &nd::Array3<C64>, zero: &ZeroMask)
        -> HeomResult<()>
    {
        let ns = self.nstates();
        if rho.dim() != (self.len(), ns, ns) {
            return Err(HeomError::StackShape(format!(
                "expected a stack of shape {:?}, got {:?}",
                (self.len(), ns, ns), rho.dim(),
            )));
        }
        if zero.len() != self.len() {
            return Err(HeomError::StackShape(format!(
                "mask covers {} ordinals, hierarchy has {}",
                zero.len(), self.len(),
            )));
        }
        Ok(())
    }

    // zeroed ordinals with no active neighbor; these are held at zero
    fn frozen(&self, zero: &ZeroMask) -> Vec<bool> {
        let h = self.hierarchy;
        let is_zero = |p: Option<usize>| p.map_or(true, |p| zero.is_zero(p));
        (0..h.len())
            .map(|n| {
                self.skip_filtered
                    && zero.is_zero(n)
                    && h.coords().all(|(m, k)| {
                        is_zero(h.raise(n, m, k)) && is_zero(h.lower(n, m, k))
                    })
            })
            .collect()
    }

    fn ado_deriv_frozen(&self, n: usize, rho: &nd::Array3<C64>, frozen: &[bool])
        -> nd::Array2<C64>
    {
        let ns = self.nstates();
        if frozen[n] {
            return nd::Array2::zeros((ns, ns));
        }
        let i = C64::i();
        let h = self.hierarchy;
        let rho_n = rho.index_axis(nd::Axis(0), n);

        let mut drho: nd::Array2<C64> = -i * commutator(self.H, &rho_n);
        drho.scaled_add(C64::from(-self.rates[n]), &rho_n);

        if self.do_truncate && !self.residual.is_zero() {
            for V in self.couplings.iter() {
                let inner = commutator(V, &rho_n);
                drho.scaled_add(C64::from(-self.residual), &commutator(V, &inner));
            }
        }

        for (m, k) in h.coords() {
            let V = &self.couplings[m];
            let c = self.bath.c_matsubara[k];
            let count = h.count(n, m, k);

            match h.raise(n, m, k) {
                Some(p) if !frozen[p] => {
                    let rho_p = rho.index_axis(nd::Axis(0), p);
                    drho.scaled_add(
                        -i * self.raise_coeff(count, c),
                        &commutator(V, &rho_p),
                    );
                },
                Some(_) => { },
                None if self.do_truncate => {
                    let coeff
                        = -(count as f64 + 1.0)
                        / (self.rates[n] + self.bath.gamma_matsubara[k]);
                    drho.scaled_add(
                        C64::from(coeff),
                        &commutator(V, &weighted_product(c, V, &rho_n)),
                    );
                },
                None => { },
            }

            if let Some(q) = h.lower(n, m, k) {
                if frozen[q] { continue; }
                if let Some(b) = self.lower_coeff(count, c) {
                    let rho_q = rho.index_axis(nd::Axis(0), q);
                    drho.scaled_add(-i * b, &weighted_product(c, V, &rho_q));
                }
            }
        }
        drho
    }

    /// Time derivative of ordinal `n`.
    ///
    /// With `skip_filtered`, an ordinal zeroed in `zero` whose raised and
    /// lowered neighbors are all zeroed as well is held at zero: its own
    /// derivative vanishes and it contributes nothing to its neighbors. A
    /// zeroed ordinal next to an active one is evaluated normally, so it can
    /// grow back. Without `skip_filtered`, `zero` is ignored.
    ///
    /// Fails if `rho` or `zero` do not match the hierarchy, or if `n` is out
    /// of range.
    pub fn ado_deriv(&self, n: usize, rho: &nd::Array3<C64>, zero: &ZeroMask)
        -> HeomResult<nd::Array2<C64>>
    {
        self.check_shapes(rho, zero)?;
        if n >= self.len() {
            return Err(HeomError::StackShape(format!(
                "ordinal {} out of range for {} ordinals", n, self.len())));
        }
        Ok(self.ado_deriv_frozen(n, rho, &self.frozen(zero)))
    }

    /// Time derivative of the whole hierarchy; see [`Self::ado_deriv`] for how
    /// `zero` is used.
    ///
    /// Ordinals are evaluated in parallel on the current rayon thread pool;
    /// each ordinal's terms are always summed in the same order.
    pub fn deriv(&self, rho: &nd::Array3<C64>, zero: &ZeroMask)
        -> HeomResult<nd::Array3<C64>>
    {
        self.check_shapes(rho, zero)?;
        let frozen = self.frozen(zero);
        let blocks: Vec<nd::Array2<C64>>
            = (0..rho.len_of(nd::Axis(0)))
            .into_par_iter()
            .map(|n| self.ado_deriv_frozen(n, rho, &frozen))
            .collect();
        let mut drho: nd::Array3<C64> = nd::Array3::zeros(rho.raw_dim());
        drho.outer_iter_mut()
            .zip(blocks)
            .for_each(|(mut target, block)| target.assign(&block));
        Ok(drho)
    }
}
