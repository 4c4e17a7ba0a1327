//! Fixed-layout binary records.
//!
//! A background worker sends each reading as a frame of little-endian `i32` fields,
//! in declaration order, with no header, length prefix or version. The frame size is
//! therefore `4 × number of fields` and both sides know it at compile time.
//!
//! ```text
//! CounterReading { incremental_units: 3, cumulative_units: 10 }
//!
//! offset  0        4        8
//!         ┌────────┬────────┐
//!         │03000000│0a000000│
//!         └────────┴────────┘
//! ```
//!
//! Use [`fixed_record!`](crate::fixed_record) to declare a record type.

use crate::error::{HarnessError, HarnessResult};
use crate::telemetry::Telemetry;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A reading with a fixed, named, `i32`-only layout.
pub trait FixedRecord: Sized + Clone + Send + Sync + 'static {
    /// Field names, in wire order.
    const FIELDS: &'static [&'static str];

    /// Encoded frame size in bytes.
    const SIZE: usize = 4 * Self::FIELDS.len();

    /// Field values, in wire order.
    fn values(&self) -> Vec<i32>;

    /// Build a record from values in wire order. Missing values are zero.
    fn from_values(values: &[i32]) -> Self;

    /// Encode as one frame.
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        for value in self.values() {
            buf.put_i32_le(value);
        }
        buf.freeze()
    }

    /// Decode one frame; fails unless `frame` is exactly [`FixedRecord::SIZE`] bytes.
    fn decode(frame: &[u8]) -> HarnessResult<Self> {
        if frame.len() != Self::SIZE {
            return Err(HarnessError::RecordLength {
                expected: Self::SIZE,
                actual: frame.len(),
            });
        }

        let mut buf = frame;
        let values: Vec<i32> = Self::FIELDS.iter().map(|_| buf.get_i32_le()).collect();
        Ok(Self::from_values(&values))
    }

    /// Telemetry sample for `device`, one field per record field.
    fn to_telemetry(&self, device: &str) -> Telemetry {
        Self::FIELDS
            .iter()
            .zip(self.values())
            .fold(Telemetry::new(device), |t, (name, value)| {
                t.with_field(*name, f64::from(value))
            })
    }
}

/// Declare a struct of `i32` fields that implements [`FixedRecord`].
///
/// ```
/// hwtest::fixed_record! {
///     /// Two-channel sample.
///     pub struct Sample {
///         pub left: i32,
///         pub right: i32,
///     }
/// }
///
/// use hwtest::driver::FixedRecord;
/// assert_eq!(Sample::SIZE, 8);
/// assert_eq!(Sample::FIELDS, &["left", "right"]);
/// ```
#[macro_export]
macro_rules! fixed_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : i32
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: i32,
            )+
        }

        impl $crate::driver::FixedRecord for $name {
            const FIELDS: &'static [&'static str] = &[$(stringify!($field)),+];

            fn values(&self) -> ::std::vec::Vec<i32> {
                vec![$(self.$field),+]
            }

            fn from_values(values: &[i32]) -> Self {
                let mut values = values.iter().copied();
                Self {
                    $($field: values.next().unwrap_or_default(),)+
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::fixed_record! {
        struct Triple {
            a: i32,
            b: i32,
            c: i32,
        }
    }

    #[test]
    fn layout_is_little_endian_in_declaration_order() {
        let record = Triple { a: 1, b: -1, c: 0x0102_0304 };
        assert_eq!(Triple::SIZE, 12);
        assert_eq!(
            record.encode().as_ref(),
            &[1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 4, 3, 2, 1]
        );
        assert_eq!(Triple::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let frame = Triple { a: 1, b: 2, c: 3 }.encode();
        for len in [0, 4, 11, 13] {
            let mut bytes = frame.to_vec();
            bytes.resize(len, 0);
            assert!(matches!(
                Triple::decode(&bytes),
                Err(HarnessError::RecordLength { expected: 12, actual }) if actual == len
            ));
        }
    }

    #[test]
    fn extreme_values_survive() {
        let record = Triple { a: i32::MIN, b: i32::MAX, c: 0 };
        assert_eq!(Triple::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn telemetry_uses_field_names() {
        let t = Triple { a: 7, b: 8, c: 9 }.to_telemetry("triple");
        assert_eq!(t.device(), "triple");
        assert_eq!(t.column_names(), vec!["device", "timestamp", "a", "b", "c"]);
        assert_eq!(t.field("b"), Some(8.0));
    }

    #[test]
    fn short_value_lists_are_zero_filled() {
        assert_eq!(Triple::from_values(&[5]), Triple { a: 5, b: 0, c: 0 });
    }
}
