use crate::error::ExperimentError;
use crate::storable::Storable;
use crate::value::{BoundedValue, NumericClass};
use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::RangeInclusive;

/// Runtime tag for the numeric type a range was built from
#[derive(Clone, Copy)]
pub struct NumericType {
    id: TypeId,
    name: &'static str,
}

impl NumericType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for NumericType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NumericType {}

impl Hash for NumericType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A closed range whose bound type has been erased
///
/// The range remembers which numeric type it came from. Code that reads a
/// definition back without knowing that type (an editor, typically) tries
/// candidate types with [`ErasedRange::recover`] until one matches.
///
/// ```
/// use sovran_experiments::ErasedRange;
///
/// let range = ErasedRange::new(0u8..=200).unwrap();
/// assert_eq!(range.recover::<i32>(), None);
/// assert_eq!(range.recover::<u8>(), Some(0..=200));
/// ```
#[derive(Clone)]
pub struct ErasedRange {
    low: Storable,
    high: Storable,
    numeric_type: NumericType,
    contains: fn(&ErasedRange, &Storable) -> bool,
}

impl ErasedRange {
    /// Erases `range`, rejecting one whose bounds are out of order
    pub fn new<T: BoundedValue>(range: RangeInclusive<T>) -> Result<Self, ExperimentError> {
        let (low, high) = range.into_inner();
        match low.partial_cmp(&high) {
            Some(Ordering::Less | Ordering::Equal) => {}
            _ => return Err(ExperimentError::inverted(&low, &high)),
        }
        Ok(Self {
            low: low.to_storable(),
            high: high.to_storable(),
            numeric_type: NumericType::of::<T>(),
            contains: contains_as::<T>,
        })
    }

    /// Rebuilds the concrete range if it was erased from a `T`
    pub fn recover<T: BoundedValue>(&self) -> Option<RangeInclusive<T>> {
        if !self.numeric_type.is::<T>() {
            return None;
        }
        let low = T::from_storable(&self.low)?;
        let high = T::from_storable(&self.high)?;
        Some(low..=high)
    }

    /// Whether `value` is of the range's numeric type and lies inside it
    pub fn contains(&self, value: &Storable) -> bool {
        (self.contains)(self, value)
    }

    pub fn numeric_type(&self) -> NumericType {
        self.numeric_type
    }

    pub fn low(&self) -> &Storable {
        &self.low
    }

    pub fn high(&self) -> &Storable {
        &self.high
    }
}

fn contains_as<T: BoundedValue>(range: &ErasedRange, value: &Storable) -> bool {
    match (range.recover::<T>(), T::from_storable(value)) {
        (Some(range), Some(value)) => range.contains(&value),
        _ => false,
    }
}

impl PartialEq for ErasedRange {
    fn eq(&self, other: &Self) -> bool {
        self.numeric_type == other.numeric_type && self.low == other.low && self.high == other.high
    }
}

impl Eq for ErasedRange {}

impl Hash for ErasedRange {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numeric_type.hash(state);
        self.low.hash(state);
        self.high.hash(state);
    }
}

impl fmt::Debug for ErasedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}..={:?} ({:?})", self.low, self.high, self.numeric_type)
    }
}

/// The shape of an experiment
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExperimentKind {
    /// Free-form text
    String,
    /// An integer held inside a closed range
    Integer(ErasedRange),
    /// A float held inside a closed range
    Float(ErasedRange),
}

impl ExperimentKind {
    /// Builds the bounded kind matching `T`'s numeric class
    pub fn bounded<T: BoundedValue>(range: RangeInclusive<T>) -> Result<Self, ExperimentError> {
        let range = ErasedRange::new(range)?;
        Ok(match T::CLASS {
            NumericClass::Integer => ExperimentKind::Integer(range),
            NumericClass::Float => ExperimentKind::Float(range),
        })
    }

    /// The range of a bounded kind; `None` for strings
    pub fn range(&self) -> Option<&ErasedRange> {
        match self {
            ExperimentKind::String => None,
            ExperimentKind::Integer(range) | ExperimentKind::Float(range) => Some(range),
        }
    }

    /// Rebuilds the concrete range if this kind is bounded by a `T`
    pub fn recover_range<T: BoundedValue>(&self) -> Option<RangeInclusive<T>> {
        self.range()?.recover::<T>()
    }
}

/// The registered shape of an experiment: its kind and its default value
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExperimentDefinition {
    pub kind: ExperimentKind,
    pub default_value: Storable,
}

impl ExperimentDefinition {
    pub fn new(kind: ExperimentKind, default_value: impl Into<Storable>) -> Self {
        Self {
            kind,
            default_value: default_value.into(),
        }
    }

    /// A string experiment
    pub fn string(default_value: impl Into<String>) -> Self {
        let default_value: String = default_value.into();
        Self::new(ExperimentKind::String, default_value)
    }

    /// A bounded numeric experiment
    pub fn bounded<T: BoundedValue>(
        default_value: T,
        range: RangeInclusive<T>,
    ) -> Result<Self, ExperimentError> {
        Ok(Self::new(
            ExperimentKind::bounded(range)?,
            default_value.to_storable(),
        ))
    }
}
