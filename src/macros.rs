/// Macro to implement the conversion surface of opaque string newtypes:
/// identifiers, keys and endpoints that wrap a `String` without carrying
/// extra validation.
#[macro_export]
macro_rules! impl_opaque_string {
    ($wrapper:ident) => {
        impl From<String> for $wrapper {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $wrapper {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<$wrapper> for String {
            fn from(wrapper: $wrapper) -> Self {
                wrapper.0
            }
        }

        impl $wrapper {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}
