//! Control function handles.
//!
//! A *control function* is an addressable participant on the bus. The engine
//! distinguishes the ones whose traffic originates from this stack
//! (`Internal`) from the ones merely observed on the wire (`External`): only
//! an internal control function may be used as the sending side of an
//! emitted frame.
//!
//! Handles are reference-counted and compared by identity, never by address:
//! two peers can transiently share an address during address claiming, and a
//! peer keeps its identity across a re-claim.

use alloc::rc::Rc;
use core::cell::Cell;

/// Destination address meaning "all nodes" (broadcast).
pub const GLOBAL_ADDRESS: u8 = 0xFF;
/// Source address of a node that has not (yet) claimed an address.
pub const NULL_ADDRESS: u8 = 0xFE;

/// Shared address-claim view carried by both control function kinds.
///
/// The fields are interior-mutable so the host's address-claim machinery can
/// re-address or invalidate a control function while sessions referencing it
/// are live; the engine picks the change up on its next tick.
#[derive(Debug)]
pub struct AddressClaimState {
    address: Cell<u8>,
    valid: Cell<bool>,
}

impl AddressClaimState {
    fn new(address: u8) -> Self {
        Self {
            address: Cell::new(address),
            valid: Cell::new(true),
        }
    }
}

/// An addressable network participant.
#[derive(Debug)]
pub enum ControlFunction {
    /// A control function managed by this stack.
    Internal(AddressClaimState),
    /// A control function observed on the bus.
    External(AddressClaimState),
}

/// Shared handle to a control function. Equality is handle identity.
pub type ControlFunctionHandle = Rc<ControlFunction>;

impl ControlFunction {
    /// Create a handle for a control function managed by this stack.
    pub fn new_internal(address: u8) -> ControlFunctionHandle {
        Rc::new(Self::Internal(AddressClaimState::new(address)))
    }

    /// Create a handle for a control function observed on the bus.
    pub fn new_external(address: u8) -> ControlFunctionHandle {
        Rc::new(Self::External(AddressClaimState::new(address)))
    }

    fn claim(&self) -> &AddressClaimState {
        match self {
            Self::Internal(state) | Self::External(state) => state,
        }
    }

    /// Current 8-bit source address.
    pub fn address(&self) -> u8 {
        self.claim().address.get()
    }

    /// Whether the address is currently claimed and usable.
    pub fn address_valid(&self) -> bool {
        self.claim().valid.get()
    }

    /// Update the address (address claim moved the node).
    pub fn set_address(&self, address: u8) {
        self.claim().address.set(address);
    }

    /// Mark the address as claimed or lost.
    pub fn set_address_valid(&self, valid: bool) {
        self.claim().valid.set(valid);
    }

    /// Whether this control function is managed by this stack.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Handle identity comparison.
pub fn same_control_function(a: &ControlFunctionHandle, b: &ControlFunctionHandle) -> bool {
    Rc::ptr_eq(a, b)
}
