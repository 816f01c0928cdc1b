use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Object-safe view of a hashable, comparable value of unknown type
trait ErasedValue: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_erased(&self, other: &dyn ErasedValue) -> bool;
    fn hash_erased(&self, state: &mut dyn Hasher);
    fn fmt_erased(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> ErasedValue for T
where
    T: Any + Send + Sync + Eq + Hash + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_erased(&self, other: &dyn ErasedValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn hash_erased(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }

    fn fmt_erased(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A type-erased, hashable value that remembers its concrete type
///
/// `Storable` is how the store keeps keys, values and range bounds of many
/// different types in the same maps. Equality and hashing come from the
/// wrapped value itself, so two storables are equal exactly when they wrap
/// equal values of the same type. Cloning is cheap: the payload is shared.
///
/// # Examples
///
/// ```
/// use sovran_experiments::Storable;
///
/// let key = Storable::new(42u16);
/// assert_eq!(key.unwrap_as::<u16>(), Some(42));
/// assert_eq!(key.unwrap_as::<u32>(), None);
///
/// // Wrapping a storable again hands back the same storable
/// assert_eq!(Storable::new(key.clone()), key);
///
/// // String slices are stored as owned strings
/// assert_eq!(Storable::from("speed"), Storable::new("speed".to_string()));
/// ```
#[derive(Clone)]
pub struct Storable {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn ErasedValue>,
}

impl Storable {
    /// Wraps a value; a value that is already a `Storable` is returned as is
    ///
    /// String slices are stored as owned `String`s, so `"k"` and
    /// `"k".to_string()` wrap to the same storable.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + Eq + Hash + fmt::Debug,
    {
        let any = &value as &dyn Any;
        if let Some(existing) = any.downcast_ref::<Storable>() {
            return existing.clone();
        }
        if let Some(text) = any.downcast_ref::<&'static str>() {
            return Storable::new(text.to_string());
        }
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Returns a copy of the wrapped value if it is a `T`
    pub fn unwrap_as<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Borrows the wrapped value if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    /// Check if the wrapped value is of type T
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// The `TypeId` of the wrapped value
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The name of the wrapped value's type, for diagnostics and editors
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for Storable {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.value.eq_erased(other.value.as_ref())
    }
}

impl Eq for Storable {}

impl Hash for Storable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.value.hash_erased(state);
    }
}

impl fmt::Debug for Storable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt_erased(f)
    }
}

impl From<&str> for Storable {
    fn from(value: &str) -> Self {
        Storable::new(value.to_string())
    }
}

macro_rules! storable_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Storable {
                fn from(value: $t) -> Self {
                    Storable::new(value)
                }
            }
        )*
    };
}

storable_from!(String, bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
