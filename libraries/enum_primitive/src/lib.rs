// Derived from https://github.com/andersk/enum_primitive-rs, which did not
// work with no_std out of the box. Trimmed to the enum shapes used in this
// workspace: public enums with an explicit discriminator per variant.
#![no_std]
pub mod cast;

/// Helper macro for internal use by `enum_from_primitive!`.
#[macro_export]
macro_rules! enum_from_primitive_impl_ty {
    ($meth:ident, $ty:ty, $name:ident, $( $variant:ident )*) => {
        #[allow(non_upper_case_globals, unused)]
        fn $meth(n: $ty) -> Option<Self> {
            $( if n == $name::$variant as $ty {
                Some($name::$variant)
            } else )* {
                None
            }
        }
    };
}

/// Helper macro for internal use by `enum_from_primitive!`.
#[macro_export]
macro_rules! enum_from_primitive_impl {
    ($name:ident, $( $variant:ident )*) => {
        impl FromPrimitive for $name {
            $crate::enum_from_primitive_impl_ty! { from_i64, i64, $name, $( $variant )* }
            $crate::enum_from_primitive_impl_ty! { from_u64, u64, $name, $( $variant )* }
        }
    };
}

/// Wrap this macro around an `enum` declaration to get an automatically
/// generated implementation of `cast::FromPrimitive`. The caller must have
/// `FromPrimitive` in scope.
#[macro_export]
macro_rules! enum_from_primitive {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident {
            $( $( #[$variant_attr:meta] )* $variant:ident = $discriminator:expr ),*
        }
    ) => {
        $( #[$enum_attr] )*
        pub enum $name {
            $( $( #[$variant_attr] )* $variant = $discriminator ),*
        }
        $crate::enum_from_primitive_impl! { $name, $( $variant )* }
    };

    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident {
            $( $( #[$variant_attr:meta] )* $variant:ident = $discriminator:expr ),+,
        }
    ) => {
        $( #[$enum_attr] )*
        pub enum $name {
            $( $( #[$variant_attr] )* $variant = $discriminator ),+,
        }
        $crate::enum_from_primitive_impl! { $name, $( $variant )+ }
    };
}
