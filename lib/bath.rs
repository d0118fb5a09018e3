//! Matsubara decomposition of the Drude-Lorentz bath correlation function.
//!
//! For reorganization energy `eta` (in the convention `eta = 2λ`), friction
//! `gamma`, and inverse temperature `beta`, the correlation function is
//! expanded as
//! ```text
//! C(t) = \sum_{k=0}^\infty c_k e^{-\nu_k t}
//! ```
//! with
//! ```text
//! \nu_0 = \gamma
//! c_0   = (\eta \gamma / 2) (\cot(\beta \gamma / 2) - i)
//! \nu_k = 2 \pi k / \beta
//! c_k   = (2 \eta \gamma / \beta) \nu_k / (\nu_k^2 - \gamma^2)
//! ```
//! and the sum is cut off after `k = KK`.

use std::f64::consts::TAU;
use log::debug;
use num_complex::Complex64 as C64;
use crate::{
    config::BOLTZMANN,
    error::{ HeomError, HeomResult },
};

/// Decay rates and weights of the retained Matsubara terms.
#[derive(Clone, Debug, PartialEq)]
pub struct BathParams {
    /// Inverse temperature.
    pub beta: f64,
    /// Reorganization energy (`2λ`).
    pub eta: f64,
    /// Bath friction.
    pub gamma: f64,
    /// Decay rates `ν_k`, `k = 0, ..., KK`.
    pub gamma_matsubara: Vec<f64>,
    /// Weights `c_k`, `k = 0, ..., KK`.
    pub c_matsubara: Vec<C64>,
}

impl BathParams {
    /// Compute the first `kk + 1` Matsubara terms at `temperature` (Kelvin).
    ///
    /// Fails if `temperature` or `gamma` are not finite and positive, or if a
    /// Matsubara frequency lands exactly on `gamma`.
    pub fn new(temperature: f64, eta: f64, gamma: f64, kk: usize)
        -> HeomResult<Self>
    {
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(HeomError::InvalidParam {
                name: "temperature",
                value: temperature,
                reason: "must be finite and positive",
            });
        }
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(HeomError::InvalidParam {
                name: "gamma",
                value: gamma,
                reason: "must be finite and positive",
            });
        }
        let beta = (BOLTZMANN * temperature).recip();
        let mut gamma_matsubara: Vec<f64> = Vec::with_capacity(kk + 1);
        let mut c_matsubara: Vec<C64> = Vec::with_capacity(kk + 1);

        gamma_matsubara.push(gamma);
        c_matsubara.push(
            eta * gamma / 2.0
            * C64::new((beta * gamma / 2.0).tan().recip(), -1.0)
        );
        for k in 1..=kk {
            let nu = TAU * k as f64 / beta;
            let denom = nu * nu - gamma * gamma;
            if denom == 0.0 {
                return Err(HeomError::DegenerateMatsubara { k });
            }
            gamma_matsubara.push(nu);
            c_matsubara.push(C64::from(2.0 * eta * gamma / beta * nu / denom));
        }

        for (k, (nu, c)) in gamma_matsubara.iter().zip(&c_matsubara).enumerate()
        {
            debug!("gamma_matsubara[{}] = {:e}  c_matsubara[{}] = {:e}",
                k, nu, k, c);
        }
        Ok(Self { beta, eta, gamma, gamma_matsubara, c_matsubara })
    }

    /// Number of retained terms, `KK + 1`.
    pub fn len(&self) -> usize { self.gamma_matsubara.len() }

    /// Always `false`: the principal term is always retained.
    pub fn is_empty(&self) -> bool { self.gamma_matsubara.is_empty() }

    /// Weight of the Matsubara terms beyond `KK`, treated as white noise.
    ///
    /// Uses `sum_{k>=0} Re(c_k) / ν_k = eta / (beta gamma)` to write the tail
    /// in closed form:
    /// ```text
    /// Δ = \eta / (\beta \gamma) - Re(c_0) / \gamma
    ///     - \sum_{k=1}^{KK} c_k / \nu_k
    /// ```
    pub fn residual(&self) -> f64 {
        let retained: f64
            = self.c_matsubara.iter()
            .zip(&self.gamma_matsubara)
            .map(|(c, nu)| c.re / nu)
            .sum();
        self.eta / (self.beta * self.gamma) - retained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ INV_CM2HA, PS2AU };

    fn default_bath(kk: usize) -> BathParams {
        BathParams::new(300.0, 2.0 * 50.0 * INV_CM2HA, 1.0 / (0.1 * PS2AU), kk)
            .unwrap()
    }

    #[test]
    fn principal_term_only() {
        let bath = default_bath(0);
        assert_eq!(bath.len(), 1);
        assert_eq!(bath.gamma_matsubara[0], bath.gamma);
        assert!(bath.c_matsubara[0].re > 0.0);
        assert!(
            (bath.c_matsubara[0].im + bath.eta * bath.gamma / 2.0).abs()
            < 1e-20
        );
    }

    #[test]
    fn matsubara_frequencies_are_spaced() {
        let bath = default_bath(4);
        assert_eq!(bath.len(), 5);
        let nu1 = bath.gamma_matsubara[1];
        assert!((nu1 - TAU / bath.beta).abs() < 1e-15);
        for k in 1..=4 {
            assert!(
                (bath.gamma_matsubara[k] - k as f64 * nu1).abs() < 1e-12 * nu1
            );
            assert_eq!(bath.c_matsubara[k].im, 0.0);
        }
    }

    #[test]
    fn residual_shrinks_with_more_terms() {
        let r: Vec<f64> = (0..6).map(|kk| default_bath(kk).residual()).collect();
        assert!(r.windows(2).all(|w| w[1].abs() <= w[0].abs()));
        // the high-temperature expansion converges to the full sum
        assert!(r[5].abs() < 0.2 * r[0].abs());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(BathParams::new(0.0, 1.0, 1.0, 0).is_err());
        assert!(BathParams::new(300.0, 1.0, -1.0, 0).is_err());
        let beta = (BOLTZMANN * 300.0).recip();
        let gamma = TAU / beta;
        assert!(matches!(
            BathParams::new(300.0, 1.0, gamma, 2),
            Err(HeomError::DegenerateMatsubara { k: 1 }),
        ));
    }
}
