//! Driver tying the pieces of a HEOM run together.
//!
//! A run validates its inputs, builds the hierarchy and bath, and then for
//! each step records a snapshot, filters on schedule, and takes one RK4 step.
//! After the last step the final state is recorded too, so a run of `nsteps`
//! steps yields `nsteps + 1` snapshots.

use std::time::Instant;
use log::{ info, warn };
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    bath::BathParams,
    config::RunParams,
    data::{ DataSink, HeomData, MemorySink, Snapshot },
    error::{ HeomError, HeomResult },
    filter::{ filter, filter_due },
    hierarchy::Hierarchy,
    rhs::HeomRhs,
    rk4::rk4_step,
    stack::{ AdoStack, ZeroMask },
};

fn build_pool(num_threads: usize) -> HeomResult<rayon::ThreadPool> {
    Ok(
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?
    )
}

// steps between progress messages; `None` disables them
fn progress_interval(progress_frequency: f64, nsteps: usize) -> Option<usize> {
    (progress_frequency > 0.0 && nsteps > 0)
        .then(|| ((progress_frequency * nsteps as f64).round() as usize).max(1))
}

fn save_logged<K: DataSink>(
    sink: &mut K,
    snap: &Snapshot<'_>,
    first_err: &mut Option<(usize, HeomError)>,
) {
    if let Err(err) = sink.save(snap) {
        warn!("failed to export step {}: {}", snap.step, err);
        first_err.get_or_insert((snap.step, err));
    }
}

/// Propagate `rho_init` under `H` and stream every snapshot to `sink`.
///
/// All parameters are checked before the first step. Errors from `sink` do
/// not interrupt propagation: each is logged, and the first is returned as
/// [`HeomError::Export`] once the run and [`DataSink::finish`] are done.
pub fn run_dynamics_with<K: DataSink>(
    params: &RunParams,
    H: &nd::Array2<C64>,
    rho_init: &nd::Array2<C64>,
    sink: &mut K,
) -> HeomResult<()>
{
    params.validate(H, rho_init)?;
    let couplings = params.couplings(H.nrows());
    let hierarchy = Hierarchy::new(couplings.len(), params.kk, params.ll)?;
    info!(
        "hierarchy: {} modes, KK = {}, LL = {}, nn_tot = {}",
        hierarchy.nmodes(), params.kk, params.ll, hierarchy.nn_tot(),
    );
    let bath = BathParams::new(
        params.temperature, params.eta, params.gamma, params.kk)?;
    let rhs = HeomRhs::new(H, &couplings, &bath, &hierarchy, params)?;
    let pool = build_pool(params.num_threads)?;

    let mut rho = AdoStack::initialize(rho_init, hierarchy.len())?;
    let mut zero = ZeroMask::none(hierarchy.len());
    let mut first_err: Option<(usize, HeomError)> = None;
    let progress = progress_interval(params.progress_frequency, params.nsteps);

    info!(
        "propagating {} steps of dt = {:e} on {} thread(s)",
        params.nsteps, params.dt, pool.current_num_threads(),
    );
    let t0 = Instant::now();
    for step in 0..params.nsteps {
        let snap = Snapshot {
            step,
            time: step as f64 * params.dt,
            ados: &rho,
            zero: &zero,
        };
        save_logged(sink, &snap, &mut first_err);

        if filter_due(step, params.filter_after_steps) {
            zero = filter(&mut rho, params.tolerance);
        }
        let next = rk4_step(
            rho.as_array(),
            params.dt,
            |y| pool.install(|| rhs.deriv(y, &zero)),
        )?;
        *rho.as_array_mut() = next;

        if progress.is_some_and(|every| (step + 1) % every == 0) {
            info!(
                "step {}/{} ({:.1}%)",
                step + 1,
                params.nsteps,
                100.0 * (step + 1) as f64 / params.nsteps as f64,
            );
        }
    }
    let snap = Snapshot {
        step: params.nsteps,
        time: params.nsteps as f64 * params.dt,
        ados: &rho,
        zero: &zero,
    };
    save_logged(sink, &snap, &mut first_err);
    if let Err(err) = sink.finish() {
        warn!("failed to finalize export: {}", err);
        first_err.get_or_insert((params.nsteps, err));
    }
    info!("done in {:.3} s", t0.elapsed().as_secs_f64());

    match first_err {
        Some((step, source)) => {
            Err(HeomError::Export { step, source: Box::new(source) })
        },
        None => Ok(()),
    }
}

/// Propagate `rho_init` under `H`, keeping every snapshot in memory.
///
/// Only the properties listed in `params.properties_to_save` are recorded.
pub fn run_dynamics(
    params: &RunParams,
    H: &nd::Array2<C64>,
    rho_init: &nd::Array2<C64>,
) -> HeomResult<HeomData>
{
    let mut sink = MemorySink::from_params(params);
    run_dynamics_with(params, H, rho_init, &mut sink)?;
    Ok(sink.into_data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Property;

    #[test]
    fn progress_cadence() {
        assert_eq!(progress_interval(0.1, 100), Some(10));
        assert_eq!(progress_interval(0.1, 3), Some(1));
        assert_eq!(progress_interval(0.0, 100), None);
        assert_eq!(progress_interval(0.5, 0), None);
    }

    #[test]
    fn records_every_step_and_the_final_state() {
        let params = RunParams {
            kk: 0,
            ll: 2,
            nsteps: 7,
            properties_to_save: [
                Property::Timestep,
                Property::Time,
                Property::Denmat,
                Property::Active,
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let H: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        let rho: nd::Array2<C64>
            = nd::Array2::from_elem((2, 2), C64::from(0.5));
        let data = run_dynamics(&params, &H, &rho).unwrap();
        assert_eq!(data.timestep, (0..=7).collect::<Vec<_>>());
        assert_eq!(data.time.len(), 8);
        assert_eq!(data.time[7], 7.0 * params.dt);
        assert_eq!(data.denmat.len(), 8);
        assert_eq!(data.denmat[0], rho);
        assert_eq!(data.active[0], 6);
    }

    #[test]
    fn invalid_input_fails_before_propagation() {
        let params = RunParams { filter_after_steps: 0, ..Default::default() };
        let H: nd::Array2<C64> = nd::Array2::eye(2);
        let mut calls = 0;
        let mut sink = |_: &Snapshot<'_>| -> HeomResult<()> {
            calls += 1;
            Ok(())
        };
        assert!(run_dynamics_with(&params, &H, &H, &mut sink).is_err());
        assert_eq!(calls, 0);

        let rho: nd::Array2<C64> = nd::Array2::eye(3);
        assert!(run_dynamics(&RunParams::default(), &H, &rho).is_err());
    }
}
