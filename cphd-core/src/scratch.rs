//! Ограниченный бюджет временной памяти читателя.
//!
//! Каждая задача берёт аренду ([`ScratchLease`]) на нужное число байт и
//! блокируется, пока в общем бюджете нет места. Аренда владеет буфером и
//! возвращает байты в бюджет при удалении.

use std::ops::{Deref, DerefMut};

use cphd_types::{CphdError, CphdResult};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct ScratchState {
    in_use: usize,
    peak: usize,
}

/// Общий бюджет буферов.
#[derive(Debug)]
pub struct ScratchSpace {
    budget: usize,
    state: Mutex<ScratchState>,
    released: Condvar,
}

/// Буфер, выданный из бюджета.
#[derive(Debug)]
pub struct ScratchLease<'a> {
    space: &'a ScratchSpace,
    buf: Vec<u8>,
}

impl ScratchSpace {
    pub fn new(budget: usize) -> CphdResult<Self> {
        if budget == 0 {
            return Err(CphdError::config("Scratch budget must be non-zero"));
        }

        Ok(Self {
            budget,
            state: Mutex::new(ScratchState::default()),
            released: Condvar::new(),
        })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Берёт `bytes` байт, ожидая освобождения при нехватке.
    pub fn acquire(
        &self,
        bytes: usize,
    ) -> CphdResult<ScratchLease<'_>> {
        if bytes > self.budget {
            return Err(CphdError::config(format!(
                "Scratch request of {bytes} bytes exceeds budget of {} bytes",
                self.budget
            )));
        }

        {
            let mut state = self.state.lock();
            while state.in_use + bytes > self.budget {
                self.released.wait(&mut state);
            }
            state.in_use += bytes;
            state.peak = state.peak.max(state.in_use);
        }

        Ok(ScratchLease {
            space: self,
            buf: vec![0u8; bytes],
        })
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().in_use
    }

    /// Максимум одновременно выданных байт.
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }

    fn release(
        &self,
        bytes: usize,
    ) {
        let mut state = self.state.lock();
        state.in_use -= bytes;
        drop(state);
        self.released.notify_all();
    }
}

impl Deref for ScratchLease<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for ScratchLease<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        self.space.release(self.buf.len());
    }
}
