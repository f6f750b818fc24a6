//! The `Reflect` trait: the per-type knowledge the path engine needs to walk and assign.
//!
//! Records opt in with [`reflect_struct!`](crate::reflect_struct), string-convertible
//! scalars with [`reflect_scalar!`](crate::reflect_scalar). `Option<T>`, `Vec<T>` and
//! `BTreeMap<String, T>` are covered generically.

use std::collections::BTreeMap;

/// Structural category of a reflected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    /// Optional indirection (`Option<T>`).
    Pointer,
    Slice,
    Map,
    Struct,
}

/// Static description of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name.
    pub name: &'static str,
    /// JSON tag, the name paths use.
    pub json: &'static str,
    /// Walkers skip hidden fields and refuse to assign through them.
    pub hidden: bool,
}

/// Returned when a string does not convert to the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unconvertible;

pub trait Reflect {
    fn type_name(&self) -> &'static str;
    fn shape(&self) -> Shape;

    fn fields(&self) -> &'static [FieldInfo] {
        &[]
    }
    fn field(&self, _index: usize) -> Option<&dyn Reflect> {
        None
    }
    fn field_mut(&mut self, _index: usize) -> Option<&mut dyn Reflect> {
        None
    }

    fn pointee(&self) -> Option<&dyn Reflect> {
        None
    }
    fn pointee_mut(&mut self) -> Option<&mut dyn Reflect> {
        None
    }
    /// Populate an empty pointer with a default value. Returns whether it allocated.
    fn allocate(&mut self) -> bool {
        false
    }

    fn len(&self) -> usize {
        0
    }
    fn element(&self, _index: usize) -> Option<&dyn Reflect> {
        None
    }
    fn element_mut(&mut self, _index: usize) -> Option<&mut dyn Reflect> {
        None
    }
    /// Convert `s` to the element type and append it unless an equal element is present.
    fn append_from_str(&mut self, _s: &str) -> Result<(), Unconvertible> {
        Err(Unconvertible)
    }

    fn map_keys(&self) -> Vec<String> {
        Vec::new()
    }
    fn entry(&self, _key: &str) -> Option<&dyn Reflect> {
        None
    }
    fn entry_mut(&mut self, _key: &str) -> Option<&mut dyn Reflect> {
        None
    }
    fn insert_default(&mut self, _key: &str) -> bool {
        false
    }

    fn set_from_str(&mut self, _s: &str) -> Result<(), Unconvertible> {
        Err(Unconvertible)
    }
    /// Scalar rendering; `None` for composite values.
    fn display(&self) -> Option<String> {
        None
    }
    /// Return to the zero value: `None`, empty collection or `Default`.
    fn reset(&mut self);

    /// Conversion used when this type is a slice or pointer element.
    fn parse_reflect(_s: &str) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }
}

/// Implement [`Reflect`] for scalar types through their `FromStr`, `Display` and `Default` impls.
#[macro_export]
macro_rules! reflect_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::Reflect for $ty {
                fn type_name(&self) -> &'static str {
                    stringify!($ty)
                }
                fn shape(&self) -> $crate::Shape {
                    $crate::Shape::Scalar
                }
                fn set_from_str(&mut self, s: &str) -> ::std::result::Result<(), $crate::Unconvertible> {
                    *self = <$ty as ::std::str::FromStr>::from_str(s).map_err(|_| $crate::Unconvertible)?;
                    Ok(())
                }
                fn display(&self) -> Option<String> {
                    Some(::std::string::ToString::to_string(self))
                }
                fn reset(&mut self) {
                    *self = <$ty as ::std::default::Default>::default();
                }
                fn parse_reflect(s: &str) -> Option<Self> {
                    <$ty as ::std::str::FromStr>::from_str(s).ok()
                }
            }
        )*
    };
}

/// Implement [`Reflect`] for a record, declaring each field's JSON tag.
///
/// ```ignore
/// reflect_struct! {
///     Container {
///         image => "image",
///         policy => "policy",
///         #[hidden] cache => "cache",
///     }
/// }
/// ```
///
/// The record must implement `Default`.
#[macro_export]
macro_rules! reflect_struct {
    (@hidden hidden) => { true };
    (@hidden) => { false };
    ($name:ident { $( $(#[$flag:ident])? $field:ident => $tag:literal ),* $(,)? }) => {
        impl $crate::Reflect for $name {
            fn type_name(&self) -> &'static str {
                stringify!($name)
            }
            fn shape(&self) -> $crate::Shape {
                $crate::Shape::Struct
            }
            fn fields(&self) -> &'static [$crate::FieldInfo] {
                const FIELDS: &[$crate::FieldInfo] = &[
                    $( $crate::FieldInfo {
                        name: stringify!($field),
                        json: $tag,
                        hidden: $crate::reflect_struct!(@hidden $($flag)?),
                    } ),*
                ];
                FIELDS
            }
            fn field(&self, index: usize) -> Option<&dyn $crate::Reflect> {
                let all: Vec<&dyn $crate::Reflect> = vec![ $( &self.$field as &dyn $crate::Reflect ),* ];
                all.into_iter().nth(index)
            }
            fn field_mut(&mut self, index: usize) -> Option<&mut dyn $crate::Reflect> {
                let all: Vec<&mut dyn $crate::Reflect> = vec![ $( &mut self.$field as &mut dyn $crate::Reflect ),* ];
                all.into_iter().nth(index)
            }
            fn reset(&mut self) {
                *self = <$name as ::std::default::Default>::default();
            }
        }
    };
}

reflect_scalar!(String, bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl<T: Reflect + Default> Reflect for Option<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
    fn shape(&self) -> Shape {
        Shape::Pointer
    }
    fn pointee(&self) -> Option<&dyn Reflect> {
        self.as_ref().map(|v| v as &dyn Reflect)
    }
    fn pointee_mut(&mut self) -> Option<&mut dyn Reflect> {
        self.as_mut().map(|v| v as &mut dyn Reflect)
    }
    fn allocate(&mut self) -> bool {
        if self.is_some() {
            return false;
        }
        *self = Some(T::default());
        true
    }
    fn display(&self) -> Option<String> {
        self.as_ref().and_then(Reflect::display)
    }
    fn reset(&mut self) {
        *self = None;
    }
    fn parse_reflect(s: &str) -> Option<Self> {
        T::parse_reflect(s).map(Some)
    }
}

impl<T: Reflect + Default> Reflect for Vec<T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
    fn shape(&self) -> Shape {
        Shape::Slice
    }
    fn len(&self) -> usize {
        Vec::len(self)
    }
    fn element(&self, index: usize) -> Option<&dyn Reflect> {
        self.get(index).map(|v| v as &dyn Reflect)
    }
    fn element_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
        self.get_mut(index).map(|v| v as &mut dyn Reflect)
    }
    fn append_from_str(&mut self, s: &str) -> Result<(), Unconvertible> {
        let item = T::parse_reflect(s).ok_or(Unconvertible)?;
        let shown = item.display();
        if shown.is_some() && self.iter().any(|e| e.display() == shown) {
            return Ok(());
        }
        self.push(item);
        Ok(())
    }
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T: Reflect + Default> Reflect for BTreeMap<String, T> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
    fn shape(&self) -> Shape {
        Shape::Map
    }
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
    fn map_keys(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
    fn entry(&self, key: &str) -> Option<&dyn Reflect> {
        self.get(key).map(|v| v as &dyn Reflect)
    }
    fn entry_mut(&mut self, key: &str) -> Option<&mut dyn Reflect> {
        self.get_mut(key).map(|v| v as &mut dyn Reflect)
    }
    fn insert_default(&mut self, key: &str) -> bool {
        if self.contains_key(key) {
            return false;
        }
        self.insert(key.to_string(), T::default());
        true
    }
    fn reset(&mut self) {
        self.clear();
    }
}
