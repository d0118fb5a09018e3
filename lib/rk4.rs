//! Classic fourth-order Runge-Kutta stepping.

use ndarray as nd;
use num_complex::Complex64 as C64;

/// Advance `y` by one step of size `dt` for the autonomous system
/// `dy/dt = rhs(y)`.
///
/// Every stage is evaluated on a freshly built intermediate state; `y` itself
/// is only read. The first error returned by `rhs` aborts the step.
pub fn rk4_step<D, F, E>(y: &nd::Array<C64, D>, dt: f64, rhs: F)
    -> Result<nd::Array<C64, D>, E>
where
    D: nd::Dimension,
    F: Fn(&nd::Array<C64, D>) -> Result<nd::Array<C64, D>, E>,
{
    let k1 = rhs(y)?;
    let k2 = rhs(&(y + &k1 * (dt / 2.0)))?;
    let k3 = rhs(&(y + &k2 * (dt / 2.0)))?;
    let k4 = rhs(&(y + &k3 * dt))?;
    Ok(y + &((k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)))
}
