///A worker task run to completion on its own thread by [`run_worker_pool`].
pub type WorkerTask<'env, E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'env>;

///Runs every task on its own thread and joins them all before returning.
///
///All workers are joined even if one fails; the first failure is propagated
///only after the last join. Worker panics are resumed on the calling thread,
///also after all joins.
pub fn run_worker_pool<'env, E: Send>(tasks: Vec<WorkerTask<'env, E>>) -> Result<(), E> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| scope.spawn(task))
            .collect();

        let mut first_error = None;
        let mut first_panic = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(payload) => {
                    if first_panic.is_none() {
                        first_panic = Some(payload);
                    }
                }
            }
        }

        //Propagate panics over errors; both only after every worker joined
        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_all_tasks_run() {
        let counter = AtomicUsize::new(0);
        let tasks: Vec<WorkerTask<'_, ()>> = (0..8)
            .map(|_| {
                Box::new(|| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as WorkerTask<'_, ()>
            })
            .collect();

        assert!(run_worker_pool(tasks).is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_first_error_propagates_after_joins() {
        let completed = AtomicUsize::new(0);
        let completed = &completed;
        let mut tasks: Vec<WorkerTask<'_, usize>> = Vec::new();
        for i in 0..4 {
            tasks.push(Box::new(move || {
                if i == 1 {
                    return Err(i);
                }
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        assert_eq!(run_worker_pool(tasks), Err(1));
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_empty_pool() {
        assert!(run_worker_pool::<()>(Vec::new()).is_ok());
    }
}
