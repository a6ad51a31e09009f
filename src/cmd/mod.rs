//! Typed builders for the protocol methods the client speaks: each params
//! struct serializes to the canonical JSON request and names the type its
//! result deserializes into.

pub mod dom;
pub mod fetch;
pub mod network;
pub mod page;
pub mod runtime;

/// Wires a params struct to its method identifier and response type.
macro_rules! command {
    ($params:ty, $identifier:literal, $returns:ty) => {
        impl $params {
            pub const IDENTIFIER: &'static str = $identifier;
        }

        impl ::cdpmux_types::Method for $params {
            fn identifier(&self) -> ::std::borrow::Cow<'static, str> {
                Self::IDENTIFIER.into()
            }
        }

        impl ::cdpmux_types::Command for $params {
            type Response = $returns;
        }
    };
}

pub(crate) use command;
