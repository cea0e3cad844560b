//! Пул рабочих потоков фиксированного размера.
//!
//! Задачи нумеруются `0..tasks` и раздаются через ограниченный канал.
//! После первой ошибки новые задачи не начинаются, уже запущенные
//! доработают до конца.

use std::sync::atomic::{AtomicBool, Ordering};

use cphd_types::{CphdError, CphdResult};
use crossbeam_channel::{bounded, unbounded};
use log::debug;

/// Пул из `workers` потоков, создаваемых на время одного вызова.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> CphdResult<Self> {
        if workers == 0 {
            return Err(CphdError::config("Worker count must be at least 1"));
        }

        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Выполняет `f(i)` для каждого `i` в `0..tasks`.
    ///
    /// Результаты возвращаются в порядке индексов задач. При ошибке
    /// возвращается первая полученная ошибка.
    pub fn run<T, F>(
        &self,
        tasks: usize,
        f: F,
    ) -> CphdResult<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> CphdResult<T> + Sync,
    {
        if tasks == 0 {
            return Ok(Vec::new());
        }

        let (job_tx, job_rx) = bounded::<usize>(tasks);
        for i in 0..tasks {
            if job_tx.send(i).is_err() {
                break;
            }
        }
        drop(job_tx);

        let (res_tx, res_rx) = unbounded::<(usize, CphdResult<T>)>();
        let stop = AtomicBool::new(false);
        let threads = self.workers.min(tasks);

        std::thread::scope(|s| {
            for worker in 0..threads {
                let job_rx = job_rx.clone();
                let res_tx = res_tx.clone();
                let stop = &stop;
                let f = &f;

                s.spawn(move || {
                    let mut done = 0usize;

                    for task in job_rx.iter() {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }

                        let result = f(task);
                        if result.is_err() {
                            stop.store(true, Ordering::Release);
                        }
                        done += 1;

                        if res_tx.send((task, result)).is_err() {
                            break;
                        }
                    }

                    debug!("Worker {worker} finished after {done} task(s)");
                });
            }
        });
        drop(res_tx);

        let mut slots: Vec<Option<T>> = (0..tasks).map(|_| None).collect();
        let mut first_error = None;

        for (task, result) in res_rx.try_iter() {
            match result {
                Ok(value) => slots[task] = Some(value),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        slots
            .into_iter()
            .collect::<Option<Vec<T>>>()
            .ok_or_else(|| CphdError::config("Worker pool lost a task result"))
    }
}
