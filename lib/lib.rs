#![allow(non_snake_case)]

//! Propagation of the hierarchical equations of motion (HEOM) for a
//! multilevel electronic system coupled to Drude-Lorentz harmonic baths.
//!
//! The usual entry points are [`run::run_dynamics`] (all snapshots kept in
//! memory) and [`run::run_dynamics_with`] (snapshots streamed to a
//! [`data::DataSink`]). The lower-level pieces are exposed for callers who
//! want to drive the propagation themselves.

pub mod error;
pub mod config;
pub mod hierarchy;
pub mod bath;
pub mod stack;
pub mod rhs;
pub mod rk4;
pub mod filter;
pub mod data;
pub mod run;

pub use error::{ HeomError, HeomResult };
pub use config::{ RunParams, Property };
pub use hierarchy::Hierarchy;
pub use bath::BathParams;
pub use stack::{ AdoStack, ZeroMask };
pub use rhs::HeomRhs;
pub use data::{
    DataSink, HeomData, MemorySink, NpzStreamSink, SinkPair, Snapshot,
};
pub use run::{ run_dynamics, run_dynamics_with };
