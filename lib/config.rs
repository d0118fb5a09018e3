//! Run configuration.
//!
//! A [`RunParams`] is built once (from [`Default`], a TOML document, or by
//! hand), checked with [`RunParams::validate`], and then only ever borrowed by
//! the rest of the crate.
//!
//! # Units
//! Everything is in atomic units except `temperature`, which is in Kelvin.
//! The unit constants below exist only to express the documented defaults;
//! converting user input is the caller's job.

use indexmap::IndexSet;
use ndarray as nd;
use num_complex::Complex64 as C64;
use serde::{ de::Error as _, Deserialize, Deserializer };
use crate::error::{ HeomError, HeomResult };

/// One femtosecond in atomic units of time.
pub const FS2AU: f64 = 41.341373335;

/// One picosecond in atomic units of time.
pub const PS2AU: f64 = 1000.0 * FS2AU;

/// One wavenumber (cm⁻¹) in Hartree.
pub const INV_CM2HA: f64 = 4.556335281212229e-6;

/// Boltzmann constant in Hartree per Kelvin.
pub const BOLTZMANN: f64 = 3.166811563e-6;

/// Names a quantity recorded at every snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    /// Step index.
    Timestep,
    /// Simulated time.
    Time,
    /// Physical (ordinal 0) density matrix.
    Denmat,
    /// Number of hierarchy members not removed by the filter.
    Active,
}

/// Read a switch written either as a boolean or as the integer `0` or `1`.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where D: Deserializer<'de>
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(i) => Err(D::Error::custom(
            format!("invalid switch value {}, expected 0 or 1", i))),
    }
}

/// Immutable parameters for a single HEOM run.
///
/// Any subset of fields may be given in a TOML document; missing fields take
/// their default values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunParams {
    /// Number of Matsubara terms beyond the principal Drude term; each bath
    /// is expanded in `KK + 1` exponentials.
    #[serde(rename = "KK")]
    pub kk: usize,
    /// Maximum total excitation (depth) of the hierarchy.
    #[serde(rename = "LL")]
    pub ll: usize,
    /// Bath friction (Drude cutoff frequency).
    pub gamma: f64,
    /// Bath reorganization energy, in the convention `eta = 2λ`.
    pub eta: f64,
    /// Bath temperature in Kelvin.
    pub temperature: f64,
    /// System-bath coupling operators, one per bath mode. `None` means one
    /// projector `|m⟩⟨m|` per electronic state.
    #[serde(skip)]
    pub el_phon_couplings: Option<Vec<nd::Array2<C64>>>,
    /// Time step.
    pub dt: f64,
    /// Number of time steps.
    pub nsteps: usize,
    /// Fraction of the run between progress messages.
    pub progress_frequency: f64,
    /// Apply the Ishizaki-Tanimura corrections: the Matsubara residual on
    /// every member and the terminator on the deepest level.
    #[serde(deserialize_with = "flag")]
    pub do_truncate: bool,
    /// Propagate the scaled hierarchy.
    #[serde(deserialize_with = "flag")]
    pub do_scale: bool,
    /// Members whose largest element falls below this are discarded.
    pub tolerance: f64,
    /// Number of steps between filter passes.
    pub filter_after_steps: usize,
    /// Hold discarded members whose neighbors were all discarded too at zero
    /// without evaluating them, until the next filter pass.
    #[serde(deserialize_with = "flag")]
    pub skip_filtered: bool,
    /// Worker threads for derivative evaluation; `0` lets rayon decide.
    pub num_threads: usize,
    /// Quantities to record. Repeated names are recorded once.
    pub properties_to_save: IndexSet<Property>,
    /// Keep every snapshot in memory and write them all at the end of the run.
    #[serde(deserialize_with = "flag")]
    pub mem_output: bool,
    /// Write each snapshot to its own file as soon as it is taken.
    #[serde(deserialize_with = "flag")]
    pub stream_output: bool,
    /// Compress written `.npz` archives.
    #[serde(deserialize_with = "flag")]
    pub use_compression: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            kk: 0,
            ll: 10,
            gamma: 1.0 / (0.1 * PS2AU),
            eta: 2.0 * 50.0 * INV_CM2HA,
            temperature: 300.0,
            el_phon_couplings: None,
            dt: 0.1 * FS2AU,
            nsteps: 10,
            progress_frequency: 0.1,
            do_truncate: true,
            do_scale: true,
            tolerance: 1e-6,
            filter_after_steps: 10,
            skip_filtered: true,
            num_threads: 1,
            properties_to_save: [
                Property::Timestep,
                Property::Time,
                Property::Denmat,
            ]
            .into_iter()
            .collect(),
            mem_output: true,
            stream_output: false,
            use_compression: false,
        }
    }
}

fn check_square(name: &'static str, M: &nd::Array2<C64>) -> HeomResult<usize> {
    let (rows, cols) = M.dim();
    if rows != cols {
        return Err(HeomError::NotSquare { name, rows, cols });
    }
    Ok(rows)
}

fn check_dim(name: &'static str, M: &nd::Array2<C64>, expected: usize)
    -> HeomResult<()>
{
    let found = check_square(name, M)?;
    if found != expected {
        return Err(HeomError::DimensionMismatch { name, expected, found });
    }
    Ok(())
}

/// Build the default coupling operators: one projector onto each electronic
/// state.
pub fn default_couplings(nstates: usize) -> Vec<nd::Array2<C64>> {
    (0..nstates)
        .map(|m| {
            let mut V: nd::Array2<C64> = nd::Array2::zeros((nstates, nstates));
            V[[m, m]] = C64::from(1.0);
            V
        })
        .collect()
}

impl RunParams {
    /// Parse from a TOML document.
    pub fn from_toml_str(s: &str) -> HeomResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Set the coupling operators.
    pub fn with_couplings(mut self, couplings: Vec<nd::Array2<C64>>) -> Self {
        self.el_phon_couplings = Some(couplings);
        self
    }

    /// Return the coupling operators for a system of `nstates` electronic
    /// states, falling back to [`default_couplings`].
    pub fn couplings(&self, nstates: usize) -> Vec<nd::Array2<C64>> {
        self.el_phon_couplings.clone()
            .unwrap_or_else(|| default_couplings(nstates))
    }

    /// Return `true` if `prop` should be recorded.
    pub fn saves(&self, prop: Property) -> bool {
        self.properties_to_save.contains(&prop)
    }

    /// Check scalar parameters and matrix shapes before any propagation.
    ///
    /// `H` fixes the electronic dimension; `rho_init` and every coupling
    /// operator must match it.
    pub fn validate(&self, H: &nd::Array2<C64>, rho_init: &nd::Array2<C64>)
        -> HeomResult<()>
    {
        let positive = |name: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(HeomError::InvalidParam {
                    name,
                    value,
                    reason: "must be finite and positive",
                })
            }
        };
        positive("gamma", self.gamma)?;
        positive("temperature", self.temperature)?;
        positive("dt", self.dt)?;
        if !(self.eta.is_finite() && self.eta >= 0.0) {
            return Err(HeomError::InvalidParam {
                name: "eta",
                value: self.eta,
                reason: "must be finite and non-negative",
            });
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(HeomError::InvalidParam {
                name: "tolerance",
                value: self.tolerance,
                reason: "must be finite and non-negative",
            });
        }
        if self.filter_after_steps == 0 {
            return Err(HeomError::InvalidParam {
                name: "filter_after_steps",
                value: 0.0,
                reason: "must be at least 1",
            });
        }
        if !(0.0..=1.0).contains(&self.progress_frequency) {
            return Err(HeomError::InvalidParam {
                name: "progress_frequency",
                value: self.progress_frequency,
                reason: "must lie in [0, 1]",
            });
        }

        let n = check_square("hamiltonian", H)?;
        check_dim("initial density matrix", rho_init, n)?;
        if let Some(couplings) = &self.el_phon_couplings {
            couplings.iter()
                .try_for_each(|V| check_dim("el-phonon coupling", V, n))?;
        }
        Ok(())
    }
}
