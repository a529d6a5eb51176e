//! Shared and weak handles to devices.
//!
//! The [super::PlatformBus] owns the one long-lived [Handle] of every device it knows. Drivers
//! receive clones for the duration of a call or keep them in their softc; back-references such
//! as a device's parent are [HandleRef]s so they never keep a device alive on their own.
use alloc::sync::{Arc, Weak};
use core::ops::Deref;

/// Owning handle.
#[derive(Debug)]
pub struct Handle<T>(Arc<T>);

/// Non-owning handle; see [Handle::create_ref].
#[derive(Debug)]
pub struct HandleRef<T>(Weak<T>);

impl<T> Handle<T> {
    pub fn create_ref(&self) -> HandleRef<T> {
        HandleRef(Arc::downgrade(&self.0))
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> HandleRef<T> {
    /// [None] once every [Handle] is gone.
    pub fn get_handle(&self) -> Option<Handle<T>> {
        self.0.upgrade().map(Handle)
    }
}

impl<T> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Handle(Arc::new(value))
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

// Derived Clone would require T: Clone.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Handle(Arc::clone(&self.0))
    }
}

impl<T> Clone for HandleRef<T> {
    fn clone(&self) -> Self {
        HandleRef(Weak::clone(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_do_not_keep_the_target_alive() {
        let owner = Handle::from(7u32);
        let weak = owner.create_ref();
        let temp = weak.get_handle().unwrap();
        assert!(temp.ptr_eq(&owner));
        assert_eq!(*temp, 7);
        drop(temp);
        drop(owner);
        assert!(weak.get_handle().is_none());
    }
}
