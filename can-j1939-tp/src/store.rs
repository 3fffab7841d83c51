//! Bounded collection of active sessions.
//!
//! Lookups are linear scans; the store is capped at a handful of entries by
//! configuration. Removal swaps with the last element, so iteration order is
//! not meaningful and nothing may depend on it.

use alloc::vec::Vec;

use crate::address::ControlFunctionHandle;
use crate::session::TransportSession;

/// Insertion failed because the configured session limit was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AtCapacity;

pub(crate) struct SessionStore<I> {
    sessions: Vec<TransportSession<I>>,
    max_sessions: usize,
}

impl<I: Copy> SessionStore<I> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(max_sessions),
            max_sessions,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    /// Index of the session keyed by (source, destination), if any.
    pub fn position(
        &self,
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
    ) -> Option<usize> {
        self.sessions
            .iter()
            .position(|session| session.matches(source, destination))
    }

    pub fn has_session(
        &self,
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
    ) -> bool {
        self.position(source, destination).is_some()
    }

    pub fn find(
        &self,
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
    ) -> Option<&TransportSession<I>> {
        self.position(source, destination)
            .map(|index| &self.sessions[index])
    }

    pub fn get(&self, index: usize) -> &TransportSession<I> {
        &self.sessions[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut TransportSession<I> {
        &mut self.sessions[index]
    }

    pub fn insert(&mut self, session: TransportSession<I>) -> Result<(), AtCapacity> {
        if self.is_full() {
            return Err(AtCapacity);
        }
        self.sessions.push(session);
        Ok(())
    }

    /// Remove and return the session at `index`. The last session takes its
    /// slot.
    pub fn remove_at(&mut self, index: usize) -> TransportSession<I> {
        self.sessions.swap_remove(index)
    }
}
