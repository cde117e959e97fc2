//! Supervisor: signal flags, stop tokens and the worker threads of `dsk monitor`.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod signals;
