//! Parallel map helpers. With the `threading` feature the maps run on rayon;
//! without it they run sequentially with identical results.
//!
//! Output order always equals input order, so callers aggregate by index and
//! never by completion order.
use crate::error::Result;

/// Worker count: the requested size, or available hardware threads − 1.
pub fn worker_count(requested: Option<usize>) -> usize {
    requested.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
    })
    .max(1)
}

#[cfg(feature = "threading")]
pub fn par_map<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    use rayon::prelude::*;
    items.par_iter().map(f).collect()
}

#[cfg(not(feature = "threading"))]
pub fn par_map<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    items.iter().map(f).collect()
}

/// Map `0..n` in parallel.
pub fn par_map_range<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync + Send,
{
    let idx: Vec<usize> = (0..n).collect();
    par_map(&idx, |&i| f(i))
}

/// Run `f` inside a bounded pool of `threads` workers.
#[cfg(feature = "threading")]
pub fn with_pool<R, F>(threads: usize, f: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| crate::error::PipelineError::ThreadPool(e.to_string()))?;
    Ok(pool.install(f))
}

#[cfg(not(feature = "threading"))]
pub fn with_pool<R, F>(_threads: usize, f: F) -> Result<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    Ok(f())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn par_map_preserves_order() {
        let v: Vec<u64> = (0..1000).collect();
        let out = par_map(&v, |&x| x * x);
        assert!(out.iter().enumerate().all(|(i, &y)| y == (i as u64) * (i as u64)));
    }

    #[test]
    fn pool_runs_closure() {
        let r = with_pool(2, || par_map_range(10, |i| i + 1).iter().sum::<usize>()).unwrap();
        assert_eq!(r, 55);
        assert!(worker_count(None) >= 1);
        assert_eq!(worker_count(Some(0)), 1);
    }
}
