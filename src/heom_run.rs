#![allow(non_snake_case)]

//! Run a single HEOM propagation described by a TOML file.
//!
//! ```text
//! heom_run <input.toml> [outdir]
//! ```
//!
//! The input holds a `[params]` table (any subset of the run parameters) and
//! a `[system]` table:
//! ```toml
//! [system]
//! hamiltonian = [[0.0, 1e-4], [1e-4, 5e-4]]
//! rho_init = [[1.0, 0.0], [0.0, 0.0]]
//! # optional:
//! # hamiltonian_im = [[...]]
//! # rho_init_im = [[...]]
//! # el_phon_couplings = [[[...]], [[...]]]
//! ```
//! All values are in atomic units (temperature in Kelvin).
//!
//! With `mem_output` set, every snapshot is written to `<outdir>/mem_data.npz`
//! at the end of the run; with `stream_output` set, each snapshot is written
//! to `<outdir>/steps/` as it is taken. Log verbosity follows `RUST_LOG`
//! (default `info`).

use std::path::PathBuf;
use anyhow::{ bail, Context };
use clap::Parser;
use ndarray as nd;
use num_complex::Complex64 as C64;
use serde::Deserialize;
use heom_sim::{
    data::{ MemorySink, NpzStreamSink, SinkPair },
    run_dynamics_with,
    RunParams,
};

#[derive(Parser, Debug)]
#[command(name = "heom_run", about = "Propagate the hierarchical equations of motion")]
struct Cli {
    /// TOML file with `[params]` and `[system]` tables.
    input: PathBuf,
    /// Output directory.
    #[arg(default_value = "output")]
    outdir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct System {
    hamiltonian: Vec<Vec<f64>>,
    hamiltonian_im: Option<Vec<Vec<f64>>>,
    rho_init: Vec<Vec<f64>>,
    rho_init_im: Option<Vec<Vec<f64>>>,
    el_phon_couplings: Option<Vec<Vec<Vec<f64>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Input {
    #[serde(default)]
    params: RunParams,
    system: System,
}

fn matrix(name: &str, re: &[Vec<f64>], im: Option<&[Vec<f64>]>)
    -> anyhow::Result<nd::Array2<C64>>
{
    let rows = re.len();
    let cols = re.first().map(|row| row.len()).unwrap_or(0);
    if re.iter().any(|row| row.len() != cols) {
        bail!("{}: rows have unequal lengths", name);
    }
    if let Some(im) = im {
        if im.len() != rows || im.iter().any(|row| row.len() != cols) {
            bail!("{}: real and imaginary parts differ in shape", name);
        }
    }
    Ok(nd::Array2::from_shape_fn((rows, cols), |(i, j)| {
        C64::new(re[i][j], im.map(|im| im[i][j]).unwrap_or(0.0))
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();
    let Cli { input, outdir } = Cli::parse();

    let text = std::fs::read_to_string(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let Input { params, system } = toml::from_str(&text)
        .with_context(|| format!("failed to parse {}", input.display()))?;

    let H = matrix(
        "hamiltonian", &system.hamiltonian, system.hamiltonian_im.as_deref())?;
    let rho_init = matrix(
        "rho_init", &system.rho_init, system.rho_init_im.as_deref())?;
    let params
        = match system.el_phon_couplings {
            Some(couplings) => {
                let couplings: Vec<nd::Array2<C64>>
                    = couplings.iter()
                    .map(|V| matrix("el_phon_couplings", V, None))
                    .collect::<anyhow::Result<_>>()?;
                params.with_couplings(couplings)
            },
            None => params,
        };

    std::fs::create_dir_all(&outdir)
        .with_context(|| format!("failed to create {}", outdir.display()))?;
    let mut mem
        = if params.mem_output {
            MemorySink::from_params(&params)
        } else {
            MemorySink::new(std::iter::empty())
        };
    if params.stream_output {
        let stream = NpzStreamSink::from_params(outdir.join("steps"), &params)?;
        let mut sink = SinkPair(mem, stream);
        run_dynamics_with(&params, &H, &rho_init, &mut sink)?;
        mem = sink.0;
    } else {
        run_dynamics_with(&params, &H, &rho_init, &mut mem)?;
    }

    if params.mem_output {
        let data = mem.into_data();
        let outfile = outdir.join("mem_data.npz");
        data.write_npz(&outfile, params.use_compression)?;
        println!("wrote {} snapshots to {}", data.len(), outfile.display());
    }
    Ok(())
}
