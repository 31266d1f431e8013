// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Tagged-union framing over plain-old-data records.
//
// The wire format is a tag byte plus the raw bytes of the active
// alternative; the framing never inspects field structure. A receiver
// rebuilds a message by default-constructing the alternative named by the
// wire tag and overwriting its bytes, so the hot path has no per-field
// branching and the only size check is the compile-time payload bound.

use std::mem::size_of;
use std::slice;

/// Marker for records that may cross a process boundary as raw bytes.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no pointers, references, or
/// heap-backed storage, and every field must be valid for any byte pattern
/// (integers, floats, and arrays of such). Padding bytes are allowed; they
/// travel as-is.
pub unsafe trait Pod: Copy + Default + 'static {}

/// Raw byte view of a POD record.
pub fn pod_bytes<T: Pod>(value: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

/// Mutable raw byte view of a POD record.
pub fn pod_bytes_mut<T: Pod>(value: &mut T) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(value as *mut T as *mut u8, size_of::<T>()) }
}

/// A closed tagged union of POD alternatives, usually generated by
/// [`message_variant!`](crate::message_variant).
///
/// The three capabilities a channel needs: the worst-case alternative size,
/// construction from a wire tag, and a byte view of the active alternative.
pub trait VariantMessage: Sized {
    /// Number of alternatives.
    const ALTERNATIVES: usize;

    /// `max(size_of(Ti))` over all alternatives.
    const MAX_SIZE: usize;

    /// Default-constructed value of the `index`-th alternative, or `None`
    /// when the tag is out of range.
    fn from_index(index: u8) -> Option<Self>;

    /// Tag of the active alternative (0-based declaration order).
    fn index(&self) -> u8;

    /// Bytes of the active alternative. The length is exactly what goes on
    /// the wire for this message.
    fn as_bytes(&self) -> &[u8];

    /// Mutable bytes of the active alternative, for the receive-side
    /// overwrite.
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// A message family as carried by a channel: either a bare variant or a
/// variant paired with a fixed companion record that rides along with
/// every message.
pub trait MessageFamily: Sized {
    /// Worst-case payload size; the region's buffer is exactly this large.
    const MAX_PAYLOAD: usize;

    /// Serialize into the payload buffer. Returns the wire tag and the
    /// length of the variant part (the companion, if any, has a fixed size
    /// known to both sides and is not counted here).
    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16);

    /// Rebuild from the payload buffer, or `None` when the tag does not
    /// name an alternative.
    fn decode_from(index: u8, len: u16, buf: &[u8]) -> Option<Self>;
}

/// Write a bare variant's wire payload into `buf`; returns (tag, length).
pub fn encode_variant<V: VariantMessage>(message: &V, buf: &mut [u8]) -> (u8, u16) {
    let span = message.as_bytes();
    buf[..span.len()].copy_from_slice(span);
    (message.index(), span.len() as u16)
}

/// Rebuild a bare variant from its wire tag and payload bytes.
pub fn decode_variant<V: VariantMessage>(index: u8, len: u16, buf: &[u8]) -> Option<V> {
    let mut message = V::from_index(index)?;
    let span = message.as_bytes_mut();
    debug_assert_eq!(span.len(), len as usize);
    let n = span.len();
    span.copy_from_slice(&buf[..n]);
    Some(message)
}

/// Pair-shaped family: the companion record is stored first, the variant
/// alternative's bytes follow.
impl<V: VariantMessage, F: Pod> MessageFamily for (V, F) {
    const MAX_PAYLOAD: usize = V::MAX_SIZE + size_of::<F>();

    fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
        let fixed = pod_bytes(&self.1);
        buf[..fixed.len()].copy_from_slice(fixed);
        encode_variant(&self.0, &mut buf[size_of::<F>()..])
    }

    fn decode_from(index: u8, len: u16, buf: &[u8]) -> Option<Self> {
        let mut fixed = F::default();
        pod_bytes_mut(&mut fixed).copy_from_slice(&buf[..size_of::<F>()]);
        let variant = decode_variant(index, len, &buf[size_of::<F>()..])?;
        Some((variant, fixed))
    }
}

/// Define a message family: a closed tagged union over POD record types.
///
/// Generates the enum, its [`VariantMessage`] impl, and a [`MessageFamily`]
/// impl for the bare-variant shape. Alternatives are tagged in declaration
/// order, starting at 0.
///
/// ```
/// use shmsg::{message_variant, Pod};
///
/// #[repr(C)]
/// #[derive(Clone, Copy, Default)]
/// struct Ping { n: u32 }
/// unsafe impl Pod for Ping {}
///
/// #[repr(C)]
/// #[derive(Clone, Copy, Default)]
/// struct Pong { n: u32 }
/// unsafe impl Pod for Pong {}
///
/// message_variant! {
///     pub enum Signal {
///         Ping(Ping),
///         Pong(Pong),
///     }
/// }
/// ```
#[macro_export]
macro_rules! message_variant {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($alt:ident($ty:ty)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($alt($ty)),+
        }

        const _: () = {
            // Every alternative must be plain-old-data.
            const fn assert_pod<T: $crate::Pod>() {}
            $(let _ = assert_pod::<$ty>;)+
        };

        impl $crate::VariantMessage for $name {
            const ALTERNATIVES: usize = {
                let sizes = [$(::std::mem::size_of::<$ty>()),+];
                sizes.len()
            };

            const MAX_SIZE: usize = {
                let sizes = [$(::std::mem::size_of::<$ty>()),+];
                let mut max = 0usize;
                let mut i = 0usize;
                while i < sizes.len() {
                    if sizes[i] > max {
                        max = sizes[i];
                    }
                    i += 1;
                }
                max
            };

            fn from_index(index: u8) -> ::std::option::Option<Self> {
                let mut i: u8 = 0;
                $(
                    if index == i {
                        return ::std::option::Option::Some(
                            Self::$alt(<$ty as ::std::default::Default>::default()),
                        );
                    }
                    i += 1;
                )+
                let _ = i;
                ::std::option::Option::None
            }

            fn index(&self) -> u8 {
                let mut i: u8 = 0;
                $(
                    if let Self::$alt(_) = self {
                        return i;
                    }
                    i += 1;
                )+
                let _ = i;
                unreachable!()
            }

            fn as_bytes(&self) -> &[u8] {
                match self {
                    $(Self::$alt(value) => $crate::variant::pod_bytes(value)),+
                }
            }

            fn as_bytes_mut(&mut self) -> &mut [u8] {
                match self {
                    $(Self::$alt(value) => $crate::variant::pod_bytes_mut(value)),+
                }
            }
        }

        impl $crate::MessageFamily for $name {
            const MAX_PAYLOAD: usize = <Self as $crate::VariantMessage>::MAX_SIZE;

            fn encode_into(&self, buf: &mut [u8]) -> (u8, u16) {
                $crate::variant::encode_variant(self, buf)
            }

            fn decode_from(
                index: u8,
                len: u16,
                buf: &[u8],
            ) -> ::std::option::Option<Self> {
                $crate::variant::decode_variant(index, len, buf)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Narrow {
        n: u32,
    }
    unsafe impl Pod for Narrow {}

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Wide {
        n: u32,
        data: [u8; 100],
    }
    unsafe impl Pod for Wide {}

    impl Default for Wide {
        fn default() -> Self {
            Self {
                n: 0,
                data: [0; 100],
            }
        }
    }

    #[repr(C)]
    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Empty {}
    unsafe impl Pod for Empty {}

    message_variant! {
        #[derive(Clone, Copy, Debug, PartialEq)]
        enum Test {
            Narrow(Narrow),
            Wide(Wide),
            Empty(Empty),
        }
    }

    #[test]
    fn max_size_is_widest_alternative() {
        assert_eq!(Test::MAX_SIZE, size_of::<Wide>());
        assert_eq!(Test::ALTERNATIVES, 3);
    }

    #[test]
    fn tag_follows_declaration_order() {
        assert_eq!(Test::Narrow(Narrow::default()).index(), 0);
        assert_eq!(Test::Wide(Wide::default()).index(), 1);
        assert_eq!(Test::Empty(Empty::default()).index(), 2);
    }

    #[test]
    fn from_index_rebuilds_each_alternative() {
        assert!(matches!(Test::from_index(0), Some(Test::Narrow(_))));
        assert!(matches!(Test::from_index(1), Some(Test::Wide(_))));
        assert!(matches!(Test::from_index(2), Some(Test::Empty(_))));
        assert!(Test::from_index(3).is_none());
        assert!(Test::from_index(u8::MAX).is_none());
    }

    #[test]
    fn span_length_matches_alternative() {
        assert_eq!(Test::Narrow(Narrow { n: 7 }).as_bytes().len(), size_of::<Narrow>());
        assert_eq!(Test::Wide(Wide::default()).as_bytes().len(), size_of::<Wide>());
        assert_eq!(Test::Empty(Empty {}).as_bytes().len(), 0);
    }

    #[test]
    fn bare_variant_encode_decode() {
        let mut wide = Wide::default();
        wide.n = 9;
        wide.data = [0xAB; 100];
        let message = Test::Wide(wide);

        let mut buf = vec![0u8; Test::MAX_PAYLOAD];
        let (index, len) = message.encode_into(&mut buf);
        assert_eq!(index, 1);
        assert_eq!(len as usize, size_of::<Wide>());

        let back = <Test as MessageFamily>::decode_from(index, len, &buf).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn pair_family_stores_companion_first() {
        #[repr(C)]
        #[derive(Clone, Copy, Default, Debug, PartialEq)]
        struct Tag {
            id: u64,
        }
        unsafe impl Pod for Tag {}

        type Family = (Test, Tag);

        let message: Family = (Test::Narrow(Narrow { n: 3 }), Tag { id: 77 });
        let mut buf = vec![0u8; Family::MAX_PAYLOAD];
        let (index, len) = message.encode_into(&mut buf);

        // The companion's bytes come first on the wire.
        assert_eq!(&buf[..8], &77u64.to_ne_bytes());

        let back = Family::decode_from(index, len, &buf).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn decode_rejects_out_of_range_tag() {
        let buf = vec![0u8; Test::MAX_PAYLOAD];
        assert!(<Test as MessageFamily>::decode_from(9, 0, &buf).is_none());
    }
}
