//! Row-wise fan-out for the rasterizer.
//!
//! With the `parallel` feature rows are mapped on the rayon pool, otherwise
//! in order on the calling thread. Output order is the row order either way.

#[cfg(feature = "parallel")]
pub(crate) fn map_rows<T, F>(rows: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    use rayon::prelude::*;
    (0..rows).into_par_iter().map(f).collect()
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn map_rows<T, F>(rows: usize, f: F) -> Vec<T>
where
    F: Fn(usize) -> T,
{
    (0..rows).map(f).collect()
}
