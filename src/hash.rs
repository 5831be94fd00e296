//! Content hashes for cached draw streams.
//!
//! A caller feeds every input that influences what it would draw into a
//! [`DrawHasher`]; the resulting [`DrawHash`] keys the drawer's cache. If an
//! entry with the same hash was built in the current or previous epoch,
//! [`try_draw`](crate::CommandDrawer::try_draw) reuses it instead of
//! re-encoding.
//!
//! Floats are hashed by bit pattern, so `0.0` and `-0.0` hash differently.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::color::Color;

/// Combined content hash of a draw stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawHash(pub u64);

/// Values that can be fed into a [`DrawHasher`].
pub trait HashInput {
    fn feed(&self, state: &mut DefaultHasher);
}

macro_rules! impl_hash_input_via_hash {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HashInput for $ty {
                fn feed(&self, state: &mut DefaultHasher) {
                    self.hash(state);
                }
            }
        )*
    };
}

impl_hash_input_via_hash!(bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, char, str, String);

impl HashInput for f32 {
    fn feed(&self, state: &mut DefaultHasher) {
        self.to_bits().hash(state);
    }
}

impl HashInput for f64 {
    fn feed(&self, state: &mut DefaultHasher) {
        self.to_bits().hash(state);
    }
}

macro_rules! impl_hash_input_for_floats {
    ($($ty:ty => $to_array:ident),* $(,)?) => {
        $(
            impl HashInput for $ty {
                fn feed(&self, state: &mut DefaultHasher) {
                    for v in self.$to_array() {
                        v.feed(state);
                    }
                }
            }
        )*
    };
}

impl_hash_input_for_floats!(
    Vec2 => to_array,
    Vec3 => to_array,
    Vec4 => to_array,
    Quat => to_array,
    Mat4 => to_cols_array,
    Color => to_array,
);

impl HashInput for DrawHash {
    fn feed(&self, state: &mut DefaultHasher) {
        self.0.hash(state);
    }
}

impl<T: HashInput + ?Sized> HashInput for &T {
    fn feed(&self, state: &mut DefaultHasher) {
        (**self).feed(state);
    }
}

impl<T: HashInput> HashInput for [T] {
    fn feed(&self, state: &mut DefaultHasher) {
        self.len().hash(state);
        for v in self {
            v.feed(state);
        }
    }
}

impl<T: HashInput> HashInput for Option<T> {
    fn feed(&self, state: &mut DefaultHasher) {
        match self {
            Some(v) => {
                1u8.hash(state);
                v.feed(state);
            }
            None => 0u8.hash(state),
        }
    }
}

/// Incremental builder for a [`DrawHash`].
///
/// # Example
///
/// ```
/// use glam::Vec3;
/// use redlilium_draw_commands::DrawHasher;
///
/// let mut a = DrawHasher::new();
/// a.add(&Vec3::ONE).add(&2.5f32).add("gizmo");
///
/// let mut b = DrawHasher::new();
/// b.add(&Vec3::ONE).add(&2.5f32).add("gizmo");
///
/// assert_eq!(a.finish(), b.finish());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DrawHasher {
    state: DefaultHasher,
}

impl DrawHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: HashInput + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.feed(&mut self.state);
        self
    }

    pub fn finish(&self) -> DrawHash {
        DrawHash(self.state.finish())
    }
}
