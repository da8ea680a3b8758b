//! Plot rendering backends.

pub mod runner;

pub use runner::PythonPlotRunner;
