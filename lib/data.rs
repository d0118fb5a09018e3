//! Recording of the propagated state.
//!
//! The run loop hands a [`Snapshot`] to a [`DataSink`] once per step, before
//! the step is taken, and once more after the last step. What the sink does
//! with it is up to the sink: [`MemorySink`] keeps the configured properties
//! in a [`HeomData`] to be written at the end, [`NpzStreamSink`] writes each
//! snapshot to disk as it arrives, and any
//! `FnMut(&Snapshot) -> HeomResult<()>` closure can stream them elsewhere.

use std::{
    fs::File,
    io::{ Seek, Write },
    path::{ Path, PathBuf },
};
use indexmap::IndexSet;
use log::info;
use ndarray as nd;
use ndarray_npy::NpzWriter;
use num_complex::Complex64 as C64;
use crate::{
    config::{ Property, RunParams },
    error::HeomResult,
    stack::{ AdoStack, ZeroMask },
};

/// Read-only view of the run state at one step.
#[derive(Copy, Clone, Debug)]
pub struct Snapshot<'a> {
    /// Step index.
    pub step: usize,
    /// Simulated time, `step * dt`.
    pub time: f64,
    /// All auxiliary density matrices.
    pub ados: &'a AdoStack,
    /// Ordinals zeroed by the most recent filter pass.
    pub zero: &'a ZeroMask,
}

impl<'a> Snapshot<'a> {
    /// Physical density matrix.
    pub fn denmat(&self) -> nd::ArrayView2<'a, C64> { self.ados.physical() }

    /// Number of ordinals not zeroed by the filter.
    pub fn num_active(&self) -> usize { self.zero.num_active() }

    /// All auxiliaries as one tall matrix.
    pub fn stacked(&self) -> nd::ArrayView2<'a, C64> { self.ados.stacked() }
}

/// Receives snapshots from a run.
pub trait DataSink {
    /// Handle one snapshot.
    ///
    /// An error does not stop the run; the first one is returned once the run
    /// is over.
    fn save(&mut self, snap: &Snapshot<'_>) -> HeomResult<()>;

    /// Called once after the final snapshot.
    fn finish(&mut self) -> HeomResult<()> { Ok(()) }
}

impl<F> DataSink for F
where F: FnMut(&Snapshot<'_>) -> HeomResult<()>
{
    fn save(&mut self, snap: &Snapshot<'_>) -> HeomResult<()> { self(snap) }
}

/// Feeds every snapshot to two sinks.
///
/// Both sinks always see every call; if both fail, the first sink's error is
/// returned.
#[derive(Clone, Debug)]
pub struct SinkPair<A, B>(pub A, pub B);

impl<A, B> DataSink for SinkPair<A, B>
where
    A: DataSink,
    B: DataSink,
{
    fn save(&mut self, snap: &Snapshot<'_>) -> HeomResult<()> {
        let a = self.0.save(snap);
        let b = self.1.save(snap);
        a.and(b)
    }

    fn finish(&mut self) -> HeomResult<()> {
        let a = self.0.finish();
        let b = self.1.finish();
        a.and(b)
    }
}

fn npz_writer<P: AsRef<Path>>(path: P, compress: bool)
    -> HeomResult<NpzWriter<File>>
{
    let file = File::create(path)?;
    Ok(if compress { NpzWriter::new_compressed(file) } else { NpzWriter::new(file) })
}

fn to_u64(values: &[usize]) -> nd::Array1<u64> {
    values.iter().map(|&x| x as u64).collect()
}

/// Everything recorded by a [`MemorySink`]. Fields for properties that were
/// not requested stay empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeomData {
    pub timestep: Vec<usize>,
    pub time: Vec<f64>,
    pub denmat: Vec<nd::Array2<C64>>,
    pub active: Vec<usize>,
}

impl HeomData {
    /// Number of recorded snapshots, as given by whichever property was
    /// recorded.
    pub fn len(&self) -> usize {
        self.timestep.len()
            .max(self.time.len())
            .max(self.denmat.len())
            .max(self.active.len())
    }

    /// Return `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Recorded physical density matrices as a `(nsnapshots, n, n)` array.
    pub fn denmat_array(&self) -> nd::Array3<C64> {
        let n = self.denmat.first().map(|rho| rho.nrows()).unwrap_or(0);
        let mut denmat: nd::Array3<C64>
            = nd::Array3::zeros((self.denmat.len(), n, n));
        denmat.outer_iter_mut()
            .zip(&self.denmat)
            .for_each(|(mut target, rho)| target.assign(rho));
        denmat
    }

    fn add_arrays<W>(&self, npz: &mut NpzWriter<W>) -> HeomResult<()>
    where W: Write + Seek
    {
        if !self.timestep.is_empty() {
            npz.add_array("timestep", &to_u64(&self.timestep))?;
        }
        if !self.time.is_empty() {
            npz.add_array("time", &nd::Array1::from_vec(self.time.clone()))?;
        }
        if !self.denmat.is_empty() {
            npz.add_array("denmat", &self.denmat_array())?;
        }
        if !self.active.is_empty() {
            npz.add_array("active", &to_u64(&self.active))?;
        }
        Ok(())
    }

    /// Write every non-empty property to an `.npz` archive under the
    /// property's name, deflate-compressed if `compress` is set.
    pub fn write_npz<P: AsRef<Path>>(&self, path: P, compress: bool)
        -> HeomResult<()>
    {
        let mut npz = npz_writer(path, compress)?;
        self.add_arrays(&mut npz)?;
        npz.finish()?;
        Ok(())
    }
}

/// Collects snapshots in memory.
#[derive(Clone, Debug)]
pub struct MemorySink {
    props: IndexSet<Property>,
    data: HeomData,
}

impl MemorySink {
    /// Create a new sink recording `properties`. Repeated properties are
    /// recorded once.
    pub fn new<I>(properties: I) -> Self
    where I: IntoIterator<Item = Property>
    {
        Self { props: properties.into_iter().collect(), data: HeomData::default() }
    }

    /// Create a new sink recording the properties requested in `params`.
    pub fn from_params(params: &RunParams) -> Self {
        Self::new(params.properties_to_save.iter().copied())
    }

    /// Recorded data so far.
    pub fn data(&self) -> &HeomData { &self.data }

    /// Unwrap into the recorded data.
    pub fn into_data(self) -> HeomData { self.data }
}

impl DataSink for MemorySink {
    fn save(&mut self, snap: &Snapshot<'_>) -> HeomResult<()> {
        for prop in self.props.iter() {
            match prop {
                Property::Timestep => { self.data.timestep.push(snap.step); },
                Property::Time => { self.data.time.push(snap.time); },
                Property::Denmat => {
                    self.data.denmat.push(snap.denmat().to_owned());
                },
                Property::Active => { self.data.active.push(snap.num_active()); },
            }
        }
        Ok(())
    }
}

/// Writes each snapshot to its own archive, `<dir>/step_<step>.npz`, as soon
/// as it is received.
///
/// Every file is complete once `save` returns, so an interrupted run keeps
/// everything recorded up to that point.
#[derive(Clone, Debug)]
pub struct NpzStreamSink {
    dir: PathBuf,
    props: IndexSet<Property>,
    compress: bool,
    written: usize,
}

impl NpzStreamSink {
    /// Create a new sink writing `properties` into `dir`, creating it if
    /// necessary.
    pub fn new<P, I>(dir: P, properties: I, compress: bool) -> HeomResult<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Property>,
    {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            props: properties.into_iter().collect(),
            compress,
            written: 0,
        })
    }

    /// Create a new sink writing the properties requested in `params`.
    pub fn from_params<P: AsRef<Path>>(dir: P, params: &RunParams)
        -> HeomResult<Self>
    {
        Self::new(
            dir,
            params.properties_to_save.iter().copied(),
            params.use_compression,
        )
    }

    /// Path of the archive for `step`.
    pub fn step_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("step_{:06}.npz", step))
    }

    /// Number of archives written so far.
    pub fn written(&self) -> usize { self.written }
}

impl DataSink for NpzStreamSink {
    fn save(&mut self, snap: &Snapshot<'_>) -> HeomResult<()> {
        let mut npz = npz_writer(self.step_path(snap.step), self.compress)?;
        for prop in self.props.iter() {
            match prop {
                Property::Timestep => {
                    npz.add_array("timestep", &to_u64(&[snap.step]))?;
                },
                Property::Time => {
                    npz.add_array("time", &nd::array![snap.time])?;
                },
                Property::Denmat => {
                    npz.add_array("denmat", &snap.denmat())?;
                },
                Property::Active => {
                    npz.add_array("active", &to_u64(&[snap.num_active()]))?;
                },
            }
        }
        npz.finish()?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> HeomResult<()> {
        info!("wrote {} snapshot files to {}", self.written, self.dir.display());
        Ok(())
    }
}
