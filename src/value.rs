use crate::storable::Storable;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

/// A concrete Rust type that can be read from and written to the store
///
/// Implemented for `String`, every integer primitive, `f32` and `f64`. Floats
/// are stored as [`TotalFloat`] so that they can be hashed and compared.
pub trait ExperimentValue: Clone + Send + Sync + Debug + 'static {
    /// Erases the value for storage
    fn to_storable(&self) -> Storable;

    /// Recovers the value, or `None` when the storable holds another type
    fn from_storable(storable: &Storable) -> Option<Self>;
}

/// How a bounded numeric is presented to editors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumericClass {
    Integer,
    Float,
}

/// A numeric type that experiments can bound with a closed range
pub trait BoundedValue: ExperimentValue + Copy + PartialOrd {
    const CLASS: NumericClass;
}

impl ExperimentValue for String {
    fn to_storable(&self) -> Storable {
        Storable::new(self.clone())
    }

    fn from_storable(storable: &Storable) -> Option<Self> {
        storable.unwrap_as::<String>()
    }
}

macro_rules! integer_experiment_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl ExperimentValue for $t {
                fn to_storable(&self) -> Storable {
                    Storable::new(*self)
                }

                fn from_storable(storable: &Storable) -> Option<Self> {
                    storable.unwrap_as::<$t>()
                }
            }

            impl BoundedValue for $t {
                const CLASS: NumericClass = NumericClass::Integer;
            }
        )*
    };
}

integer_experiment_value!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// `f32` and `f64`, as far as [`TotalFloat`] is concerned
pub trait FloatBits: sealed::Sealed + Copy + Send + Sync + Debug + PartialEq + 'static {
    #[doc(hidden)]
    fn canonical_bits(self) -> u64;
}

impl FloatBits for f32 {
    fn canonical_bits(self) -> u64 {
        if self.is_nan() {
            f32::NAN.to_bits() as u64
        } else if self == 0.0 {
            0
        } else {
            self.to_bits() as u64
        }
    }
}

impl FloatBits for f64 {
    fn canonical_bits(self) -> u64 {
        if self.is_nan() {
            f64::NAN.to_bits()
        } else if self == 0.0 {
            0
        } else {
            self.to_bits()
        }
    }
}

/// A float with total equality, so it can live inside a [`Storable`]
///
/// Every NaN equals every other NaN, and `-0.0` equals `0.0`; otherwise two
/// floats are equal when they have the same bits.
#[derive(Clone, Copy, Debug)]
pub struct TotalFloat<F: FloatBits>(pub F);

impl<F: FloatBits> TotalFloat<F> {
    pub fn get(self) -> F {
        self.0
    }
}

impl<F: FloatBits> PartialEq for TotalFloat<F> {
    fn eq(&self, other: &Self) -> bool {
        self.0.canonical_bits() == other.0.canonical_bits()
    }
}

impl<F: FloatBits> Eq for TotalFloat<F> {}

impl<F: FloatBits> Hash for TotalFloat<F> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.canonical_bits().hash(state);
    }
}

macro_rules! float_experiment_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl ExperimentValue for $t {
                fn to_storable(&self) -> Storable {
                    Storable::new(TotalFloat(*self))
                }

                fn from_storable(storable: &Storable) -> Option<Self> {
                    storable.downcast_ref::<TotalFloat<$t>>().map(|f| f.get())
                }
            }

            impl BoundedValue for $t {
                const CLASS: NumericClass = NumericClass::Float;
            }

            impl From<$t> for Storable {
                fn from(value: $t) -> Self {
                    value.to_storable()
                }
            }
        )*
    };
}

float_experiment_value!(f32, f64);
