#![allow(non_snake_case)]

use indexmap::IndexSet;
use ndarray as nd;
use ndarray_npy::NpzReader;
use num_complex::Complex64 as C64;
use heom_sim::{
    config::{ BOLTZMANN, Property },
    data::{ MemorySink, NpzStreamSink, SinkPair, Snapshot },
    HeomData,
    run_dynamics,
    run_dynamics_with,
    HeomError,
    HeomResult,
    RunParams,
};

fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

fn all_properties() -> IndexSet<Property> {
    [Property::Timestep, Property::Time, Property::Denmat, Property::Active]
        .into_iter()
        .collect()
}

fn max_denmat_diff(a: &HeomData, b: &HeomData) -> f64 {
    assert_eq!(a.denmat.len(), b.denmat.len());
    a.denmat.iter().zip(&b.denmat)
        .flat_map(|(x, y)| x.iter().zip(y).map(|(xk, yk)| (xk - yk).norm()))
        .fold(0.0, f64::max)
}

fn two_level() -> (nd::Array2<C64>, nd::Array2<C64>) {
    let H = nd::array![
        [c(0.0, 0.0), c(1e-4, 0.0)],
        [c(1e-4, 0.0), c(5e-4, 0.0)],
    ];
    let rho = nd::array![
        [c(1.0, 0.0), c(0.0, 0.0)],
        [c(0.0, 0.0), c(0.0, 0.0)],
    ];
    (H, rho)
}

#[test]
fn single_state_keeps_unit_trace() {
    let params = RunParams {
        kk: 0,
        ll: 0,
        nsteps: 10,
        dt: 0.01,
        ..Default::default()
    };
    let H = nd::array![[c(0.0, 0.0)]];
    let rho = nd::array![[c(1.0, 0.0)]];
    let data = run_dynamics(&params, &H, &rho).unwrap();
    assert_eq!(data.denmat.len(), 11);
    for rho_t in data.denmat.iter() {
        assert!((rho_t.diag().sum() - 1.0).norm() < 1e-8);
    }
}

// With LL = 0 and truncation on, a two-level system with projector couplings
// dephases at rate 2 eta / (beta gamma) while populations stay fixed.
fn dephasing_error(dt: f64, t_final: f64) -> f64 {
    let omega = 0.01;
    let eta = 1e-3;
    let gamma = 1e-2;
    let temperature = 300.0;
    let params = RunParams {
        kk: 0,
        ll: 0,
        gamma,
        eta,
        temperature,
        dt,
        nsteps: (t_final / dt).round() as usize,
        ..Default::default()
    };
    let H = nd::array![[c(0.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(omega, 0.0)]];
    let rho = nd::array![[c(0.6, 0.0), c(0.3, 0.2)], [c(0.3, -0.2), c(0.4, 0.0)]];
    let data = run_dynamics(&params, &H, &rho).unwrap();

    let beta = 1.0 / (BOLTZMANN * temperature);
    let rate = 2.0 * eta / (beta * gamma);
    let exact = rho[[0, 1]] * (c(-rate, omega) * t_final).exp();
    let last = data.denmat.last().unwrap();
    assert!((last[[0, 0]] - rho[[0, 0]]).norm() < 1e-12);
    assert!((last[[1, 1]] - rho[[1, 1]]).norm() < 1e-12);
    (last[[0, 1]] - exact).norm()
}

#[test]
fn dephasing_converges_at_fourth_order() {
    let t_final = 5000.0;
    let e1 = dephasing_error(20.0, t_final);
    let e2 = dephasing_error(10.0, t_final);
    let e3 = dephasing_error(5.0, t_final);
    assert!(e2 < 1e-3, "{}", e2);
    let r1 = e1 / e2;
    let r2 = e2 / e3;
    assert!((12.0..20.0).contains(&r1), "{}", r1);
    assert!((12.0..20.0).contains(&r2), "{}", r2);
}

#[test]
fn trace_and_hermiticity_are_conserved() {
    let (H, rho) = two_level();
    for (do_truncate, do_scale) in [(true, true), (false, false)] {
        let params = RunParams {
            kk: 1,
            ll: 3,
            nsteps: 60,
            filter_after_steps: 5,
            do_truncate,
            do_scale,
            properties_to_save: all_properties(),
            ..Default::default()
        };
        let data = run_dynamics(&params, &H, &rho).unwrap();
        assert_eq!(data.len(), 61);
        for rho_t in data.denmat.iter() {
            assert!((rho_t.diag().sum() - 1.0).norm() < 1e-10);
            let herm = rho_t - &rho_t.t().mapv(|x| x.conj());
            assert!(herm.iter().all(|x| x.norm() < 1e-12));
        }
        let last = data.denmat.last().unwrap();
        assert!(last[[1, 1]].re > 0.0);
    }
}

#[test]
fn filter_marks_negligible_auxiliaries() {
    let (H, rho) = two_level();
    let params = RunParams {
        kk: 0,
        ll: 2,
        nsteps: 5,
        tolerance: 1.0,
        filter_after_steps: 10,
        properties_to_save: all_properties(),
        ..Default::default()
    };
    let data = run_dynamics(&params, &H, &rho).unwrap();
    assert_eq!(data.active, vec![6, 6, 1, 1, 1, 1]);

    let params = RunParams { tolerance: 0.0, ..params };
    let data = run_dynamics(&params, &H, &rho).unwrap();
    assert!(data.active.iter().all(|&a| a == 6));
}

// Every auxiliary is discarded at each filter pass. Those next to the
// physical matrix must keep evolving in between, so that skipping the rest
// changes the physical matrix far less than the bath itself does.
#[test]
fn skipping_filtered_auxiliaries_tracks_the_full_evaluation() {
    let (H, rho) = two_level();
    let params = RunParams {
        kk: 0,
        ll: 3,
        nsteps: 400,
        tolerance: 1.0,
        filter_after_steps: 10,
        skip_filtered: true,
        ..Default::default()
    };
    let skipped = run_dynamics(&params, &H, &rho).unwrap();
    let params = RunParams { skip_filtered: false, ..params };
    let full = run_dynamics(&params, &H, &rho).unwrap();
    let params = RunParams { eta: 0.0, ..params };
    let isolated = run_dynamics(&params, &H, &rho).unwrap();

    let d_skip = max_denmat_diff(&skipped, &full);
    let d_bath = max_denmat_diff(&full, &isolated);
    assert!(d_bath > 0.0);
    assert!(d_skip < 0.05 * d_bath, "{} vs {}", d_skip, d_bath);
}

#[test]
fn scaling_leaves_the_physical_matrix_unchanged() {
    let (H, rho) = two_level();
    let params = RunParams {
        kk: 1,
        ll: 3,
        nsteps: 50,
        tolerance: 0.0,
        do_scale: true,
        ..Default::default()
    };
    let scaled = run_dynamics(&params, &H, &rho).unwrap();
    let params = RunParams { do_scale: false, ..params };
    let unscaled = run_dynamics(&params, &H, &rho).unwrap();
    let d = max_denmat_diff(&scaled, &unscaled);
    assert!(d < 1e-12, "{}", d);
    assert!(scaled.denmat.last().unwrap()[[1, 1]].re > 0.0);
}

#[test]
fn results_do_not_depend_on_thread_count() {
    let (H, rho) = two_level();
    let params = RunParams {
        kk: 1,
        ll: 4,
        nsteps: 20,
        num_threads: 1,
        ..Default::default()
    };
    let serial = run_dynamics(&params, &H, &rho).unwrap();
    let params = RunParams { num_threads: 3, ..params };
    let parallel = run_dynamics(&params, &H, &rho).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn sink_errors_surface_after_the_run() {
    let (H, rho) = two_level();
    let params = RunParams { kk: 0, ll: 1, nsteps: 8, ..Default::default() };
    let mut seen: Vec<usize> = Vec::new();
    let mut sink = |snap: &Snapshot<'_>| -> HeomResult<()> {
        seen.push(snap.step);
        if snap.step == 3 || snap.step == 5 {
            Err(HeomError::Sink(format!("disk full at {}", snap.step)))
        } else {
            Ok(())
        }
    };
    let res = run_dynamics_with(&params, &H, &rho, &mut sink);
    match res {
        Err(HeomError::Export { step, source }) => {
            assert_eq!(step, 3);
            assert!(matches!(*source, HeomError::Sink(_)));
        },
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(seen, (0..=8).collect::<Vec<_>>());
}

#[test]
fn npz_export_of_a_run() {
    let (H, rho) = two_level();
    let params = RunParams {
        kk: 0,
        ll: 2,
        nsteps: 4,
        properties_to_save: all_properties(),
        ..Default::default()
    };
    let data = run_dynamics(&params, &H, &rho).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mem_data.npz");
    data.write_npz(&path, true).unwrap();
    let mut npz = NpzReader::new(std::fs::File::open(&path).unwrap()).unwrap();
    let denmat: nd::Array3<C64> = npz.by_name("denmat").unwrap();
    assert_eq!(denmat, data.denmat_array());
}

#[test]
fn streamed_and_in_memory_records_agree() {
    let (H, rho) = two_level();
    let params = RunParams {
        kk: 0,
        ll: 2,
        nsteps: 6,
        properties_to_save: all_properties(),
        ..Default::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let stream = NpzStreamSink::from_params(dir.path().join("steps"), &params)
        .unwrap();
    let mut sink = SinkPair(MemorySink::from_params(&params), stream);
    run_dynamics_with(&params, &H, &rho, &mut sink).unwrap();
    let SinkPair(mem, stream) = sink;
    let data = mem.into_data();
    assert_eq!(data, run_dynamics(&params, &H, &rho).unwrap());
    assert_eq!(stream.written(), 7);

    for (step, rho_t) in data.denmat.iter().enumerate() {
        let file = std::fs::File::open(stream.step_path(step)).unwrap();
        let mut npz = NpzReader::new(file).unwrap();
        let denmat: nd::Array2<C64> = npz.by_name("denmat").unwrap();
        let active: nd::Array1<u64> = npz.by_name("active").unwrap();
        assert_eq!(&denmat, rho_t);
        assert_eq!(active[0], data.active[step] as u64);
    }
}
