//! Newtype wrappers around plain integers.

/// Conversions from and into the wrapped type plus [core::ops::Deref] for a one-field tuple
/// struct.
#[macro_export]
macro_rules! impl_basic {
    ($name: ident, $type: ty) => {
        impl core::convert::From<$type> for $name {
            fn from(value: $type) -> Self {
                $name(value)
            }
        }

        impl core::convert::From<$name> for $type {
            fn from(value: $name) -> $type {
                value.0
            }
        }

        impl core::ops::Deref for $name {
            type Target = $type;

            fn deref(&self) -> &$type {
                &self.0
            }
        }
    };
}

/// Define a newtype over an integer.
///
/// - `index`: an opaque copyable id, compared for equality only.
/// - `counter`: ordered, and steps by the wrapped type: `A + N = A`, `A - A = N`.
#[macro_export]
macro_rules! define_struct {
    (index, $(#[$meta: meta])* $name: ident, $type: ty) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        #[repr(transparent)]
        pub struct $name($type);

        $crate::impl_basic!($name, $type);
    };

    (counter, $(#[$meta: meta])* $name: ident, $type: ty) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[repr(transparent)]
        pub struct $name($type);

        $crate::impl_basic!($name, $type);

        impl core::ops::Add<$type> for $name {
            type Output = $name;
            fn add(self, rhs: $type) -> $name {
                $name(self.0 + rhs)
            }
        }

        impl core::ops::Sub for $name {
            type Output = $type;
            fn sub(self, rhs: $name) -> $type {
                self.0 - rhs.0
            }
        }
    };
}
