/// Conversion of Rust values into Alpaca request parameters.
///
/// Alpaca expects booleans as `True` / `False`; everything else uses its
/// regular string form.
pub(crate) trait ASCOMParam {
    fn to_param(self) -> String;
}

impl ASCOMParam for String {
    fn to_param(self) -> String {
        self
    }
}

impl ASCOMParam for &str {
    fn to_param(self) -> String {
        self.to_owned()
    }
}

impl ASCOMParam for bool {
    fn to_param(self) -> String {
        (if self { "True" } else { "False" }).to_owned()
    }
}

macro_rules! simple_ascom_param {
    ($($ty:ty),*) => {
        $(
            impl ASCOMParam for $ty {
                fn to_param(self) -> String {
                    ToString::to_string(&self)
                }
            }
        )*
    };
}

simple_ascom_param!(i32, u32, f64);

/// Builds an ad-hoc serializable struct with Alpaca parameter names as keys.
macro_rules! params {
    ($($key:ident: $value:expr),* $(,)?) => {{
        #[derive(Debug, serde::Serialize)]
        #[allow(non_snake_case)]
        struct Params {
            $($key: String,)*
        }

        Params {
            $($key: $crate::params::ASCOMParam::to_param($value),)*
        }
    }};
}
pub(crate) use params;
