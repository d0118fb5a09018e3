//! Storage for the full set of auxiliary density matrices.
//!
//! All `nn_tot + 1` matrices live in a single contiguous 3D array whose first
//! axis is the hierarchy ordinal. Because the array is kept in standard
//! layout, the same buffer can be viewed as one tall `((nn_tot + 1) nstates) x
//! nstates` matrix in which rows `k nstates .. (k + 1) nstates` hold ordinal
//! `k`.

use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use crate::error::{ HeomError, HeomResult };

/// Every auxiliary density matrix of the hierarchy, indexed by ordinal.
#[derive(Clone, Debug, PartialEq)]
pub struct AdoStack {
    data: nd::Array3<C64>,
}

impl AdoStack {
    /// Create a stack of `nado` zero matrices of dimension `nstates`.
    pub fn zeros(nado: usize, nstates: usize) -> Self {
        Self { data: nd::Array3::zeros((nado, nstates, nstates)) }
    }

    /// Create a stack of `nado` matrices with `rho_init` at ordinal 0 and zero
    /// everywhere else.
    pub fn initialize(rho_init: &nd::Array2<C64>, nado: usize)
        -> HeomResult<Self>
    {
        let (rows, cols) = rho_init.dim();
        if rows != cols {
            return Err(HeomError::NotSquare {
                name: "initial density matrix", rows, cols });
        }
        if nado == 0 {
            return Err(HeomError::StackShape(
                "a stack needs at least the physical density matrix".into()));
        }
        let mut stack = Self::zeros(nado, rows);
        stack.data.slice_mut(s![0, .., ..]).assign(rho_init);
        Ok(stack)
    }

    /// Build a stack from per-ordinal matrices, which must all be square with
    /// the same dimension.
    pub fn pack(ados: &[nd::Array2<C64>]) -> HeomResult<Self> {
        let nstates = ados.first().map(|a| a.nrows()).unwrap_or(0);
        let mut stack = Self::zeros(ados.len(), nstates);
        stack.pack_into(ados)?;
        Ok(stack)
    }

    /// Overwrite the stack with per-ordinal matrices.
    pub fn pack_into(&mut self, ados: &[nd::Array2<C64>]) -> HeomResult<()> {
        self.check_count(ados.len())?;
        let shape = [self.nstates(); 2];
        for (n, (mut block, rho)) in
            self.data.outer_iter_mut().zip(ados).enumerate()
        {
            if rho.shape() != shape {
                return Err(HeomError::StackShape(format!(
                    "ordinal {} has shape {:?}, expected {:?}",
                    n, rho.shape(), shape,
                )));
            }
            block.assign(rho);
        }
        Ok(())
    }

    /// Copy out one matrix per ordinal.
    pub fn unpack(&self) -> Vec<nd::Array2<C64>> {
        self.data.outer_iter().map(|block| block.to_owned()).collect()
    }

    /// Copy every ordinal into a pre-allocated list of matrices.
    pub fn unpack_into(&self, ados: &mut [nd::Array2<C64>]) -> HeomResult<()> {
        self.check_count(ados.len())?;
        let shape = [self.nstates(); 2];
        for (n, (block, rho)) in
            self.data.outer_iter().zip(ados.iter_mut()).enumerate()
        {
            if rho.shape() != shape {
                return Err(HeomError::StackShape(format!(
                    "ordinal {} has shape {:?}, expected {:?}",
                    n, rho.shape(), shape,
                )));
            }
            rho.assign(&block);
        }
        Ok(())
    }

    /// Build a stack from its tall-matrix form.
    pub fn from_stacked(stacked: nd::Array2<C64>, nstates: usize)
        -> HeomResult<Self>
    {
        let (rows, cols) = stacked.dim();
        if cols != nstates || nstates == 0 || rows % nstates != 0 {
            return Err(HeomError::StackShape(format!(
                "cannot split a {}x{} matrix into {}x{} blocks",
                rows, cols, nstates, nstates,
            )));
        }
        let data
            = stacked.as_standard_layout()
            .into_owned()
            .into_shape((rows / nstates, nstates, nstates))
            .map_err(|e| HeomError::StackShape(e.to_string()))?;
        Ok(Self { data })
    }

    /// View the stack as one tall matrix.
    pub fn stacked(&self) -> nd::ArrayView2<'_, C64> {
        let (nado, n, _) = self.data.dim();
        self.data.view()
            .into_shape((nado * n, n))
            .expect("AdoStack::stacked: stack is always in standard layout")
    }

    /// Convert into the tall-matrix form.
    pub fn into_stacked(self) -> nd::Array2<C64> {
        let (nado, n, _) = self.data.dim();
        self.data
            .into_shape((nado * n, n))
            .expect("AdoStack::into_stacked: stack is always in standard layout")
    }

    /// Number of ordinals.
    pub fn len(&self) -> usize { self.data.len_of(nd::Axis(0)) }

    /// Return `true` if the stack holds no matrices.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Electronic dimension.
    pub fn nstates(&self) -> usize { self.data.len_of(nd::Axis(1)) }

    /// Matrix for ordinal `n`.
    pub fn ado(&self, n: usize) -> nd::ArrayView2<'_, C64> {
        self.data.slice(s![n, .., ..])
    }

    /// Mutable matrix for ordinal `n`.
    pub fn ado_mut(&mut self, n: usize) -> nd::ArrayViewMut2<'_, C64> {
        self.data.slice_mut(s![n, .., ..])
    }

    /// The physical density matrix (ordinal 0).
    pub fn physical(&self) -> nd::ArrayView2<'_, C64> { self.ado(0) }

    /// Underlying 3D array.
    pub fn as_array(&self) -> &nd::Array3<C64> { &self.data }

    /// Mutable underlying 3D array.
    pub fn as_array_mut(&mut self) -> &mut nd::Array3<C64> { &mut self.data }

    fn check_count(&self, count: usize) -> HeomResult<()> {
        if count != self.len() {
            return Err(HeomError::StackShape(format!(
                "expected {} matrices, got {}", self.len(), count)));
        }
        Ok(())
    }
}

/// Records which ordinals the filter has zeroed.
///
/// Ordinal 0 is never marked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZeroMask(Vec<bool>);

impl ZeroMask {
    /// A mask over `nado` ordinals with nothing zeroed.
    pub fn none(nado: usize) -> Self { Self(vec![false; nado]) }

    /// Return `true` if ordinal `n` is zeroed.
    pub fn is_zero(&self, n: usize) -> bool { self.0[n] }

    /// Return `true` if ordinal `n` is not zeroed.
    pub fn is_active(&self, n: usize) -> bool { !self.0[n] }

    /// Mark ordinal `n`. Marking ordinal 0 has no effect.
    pub fn set_zero(&mut self, n: usize, zero: bool) {
        if n > 0 { self.0[n] = zero; }
    }

    /// Number of ordinals covered by the mask.
    pub fn len(&self) -> usize { self.0.len() }

    /// Return `true` if the mask covers no ordinals.
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Number of zeroed ordinals.
    pub fn num_zero(&self) -> usize { self.0.iter().filter(|z| **z).count() }

    /// Number of active ordinals.
    pub fn num_active(&self) -> usize { self.len() - self.num_zero() }

    /// Iterate over the zeroed ordinals.
    pub fn zeroed(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().filter_map(|(n, &z)| z.then_some(n))
    }
}
