//! Arena storage.
//!
//! Instructions, blocks, functions and intervals all refer to each other: a
//! split child names its parent, the parent lists its children, a hint names
//! another interval. They are kept in append-only arenas and linked by
//! handles, which are plain indices tagged with the type they point to.
//!
//! - [Arena]: Storage handing out handles.
//! - [ArenaPtr]: A handle, dereferenced against its arena.
//! - [BaseArena]: The vector-backed arena behind every container.
//!
//! A container holding several arenas gets one typed handle per arena from
//! [impl_arena](crate::impl_arena).
//!
//! ```rust
//! use linscan::impl_arena;
//! use linscan::collections::storage::*;
//!
//! struct Slot { size: u32 }
//!
//! #[derive(Clone, Copy, PartialEq, Eq)]
//! struct SlotId(BaseArenaPtr<Slot>);
//!
//! #[derive(Default)]
//! struct Frame {
//!     slots: BaseArena<Slot>,
//! }
//!
//! impl_arena!(Frame, Slot, SlotId, slots);
//!
//! let mut frame = Frame::default();
//! let slot = frame.alloc(Slot { size: 4 });
//! slot.deref_mut(&mut frame).size = 8;
//!
//! assert_eq!(slot.deref(&frame).size, 8);
//! ```

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

/// Storage of `T` handing out handles of type `P`.
///
/// Values are never freed one by one, the arena goes away with the context
/// or the allocation that owns it.
pub trait Arena<T, P>
where
    P: ArenaPtr<T = T, A = Self>,
{
    /// The value behind `ptr`, `None` if the handle is from another arena.
    fn get(&self, ptr: P) -> Option<&T>;

    fn get_mut(&mut self, ptr: P) -> Option<&mut T>;

    /// Allocate a value built from its own handle.
    fn alloc_with<F>(&mut self, f: F) -> P
    where
        F: FnOnce(P) -> T;

    fn alloc(&mut self, value: T) -> P { self.alloc_with(|_| value) }
}

/// A handle into an [Arena].
pub trait ArenaPtr: Copy + Eq {
    type T;

    type A: Arena<Self::T, Self>;

    fn try_deref(self, arena: &Self::A) -> Option<&Self::T> { arena.get(self) }

    fn try_deref_mut(self, arena: &mut Self::A) -> Option<&mut Self::T> { arena.get_mut(self) }

    /// # Panics
    ///
    /// Panics if the handle was minted by another arena.
    fn deref(self, arena: &Self::A) -> &Self::T {
        self.try_deref(arena)
            .expect("handle does not belong to this arena")
    }

    /// # Panics
    ///
    /// Panics if the handle was minted by another arena.
    fn deref_mut(self, arena: &mut Self::A) -> &mut Self::T {
        self.try_deref_mut(arena)
            .expect("handle does not belong to this arena")
    }
}

/// The index of a value in a [BaseArena].
///
/// Handles compare by allocation order.
pub struct BaseArenaPtr<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BaseArenaPtr<T> {
    fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn id(self) -> usize { self.index }
}

// manual impls, `T` itself needs none of these
impl<T> Clone for BaseArenaPtr<T> {
    fn clone(&self) -> Self { *self }
}

impl<T> Copy for BaseArenaPtr<T> {}

impl<T> PartialEq for BaseArenaPtr<T> {
    fn eq(&self, other: &Self) -> bool { self.index == other.index }
}

impl<T> Eq for BaseArenaPtr<T> {}

impl<T> PartialOrd for BaseArenaPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl<T> Ord for BaseArenaPtr<T> {
    fn cmp(&self, other: &Self) -> Ordering { self.index.cmp(&other.index) }
}

impl<T> Hash for BaseArenaPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) { self.index.hash(state); }
}

impl<T> fmt::Debug for BaseArenaPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.index) }
}

impl<T> ArenaPtr for BaseArenaPtr<T> {
    type A = BaseArena<T>;
    type T = T;
}

/// An append-only vector of values.
pub struct BaseArena<T> {
    values: Vec<T>,
}

impl<T> Default for BaseArena<T> {
    fn default() -> Self { Self { values: Vec::new() } }
}

impl<T> Arena<T, BaseArenaPtr<T>> for BaseArena<T> {
    fn get(&self, ptr: BaseArenaPtr<T>) -> Option<&T> { self.values.get(ptr.index) }

    fn get_mut(&mut self, ptr: BaseArenaPtr<T>) -> Option<&mut T> { self.values.get_mut(ptr.index) }

    fn alloc_with<F>(&mut self, f: F) -> BaseArenaPtr<T>
    where
        F: FnOnce(BaseArenaPtr<T>) -> T,
    {
        let ptr = BaseArenaPtr::new(self.values.len());
        let value = f(ptr);
        self.values.push(value);
        ptr
    }
}

impl<T> BaseArena<T> {
    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Values with their handles, in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (BaseArenaPtr<T>, &T)> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| (BaseArenaPtr::new(index), value))
    }
}

/// Give a typed handle wrapping a [BaseArenaPtr] access to the arena in
/// `$field` of `$arena`.
#[macro_export]
macro_rules! impl_arena {
    ($arena:ty, $value:ty, $ptr:path, $field:ident) => {
        impl $crate::collections::storage::ArenaPtr for $ptr {
            type A = $arena;
            type T = $value;
        }

        impl $crate::collections::storage::Arena<$value, $ptr> for $arena {
            fn get(&self, ptr: $ptr) -> Option<&$value> {
                $crate::collections::storage::Arena::get(&self.$field, ptr.0)
            }

            fn get_mut(&mut self, ptr: $ptr) -> Option<&mut $value> {
                $crate::collections::storage::Arena::get_mut(&mut self.$field, ptr.0)
            }

            fn alloc_with<F>(&mut self, f: F) -> $ptr
            where
                F: FnOnce($ptr) -> $value,
            {
                $ptr($crate::collections::storage::Arena::alloc_with(
                    &mut self.$field,
                    |ptr| f($ptr(ptr)),
                ))
            }
        }
    };
}
