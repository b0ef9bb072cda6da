//! Logging helpers, adapted from `ethers_providers`'s `ws_error!`/`ws_warn!`
//! family (`rpc/transports/ws2/macros.rs`). The wasm branch is dropped: this
//! crate targets native tokio only.

macro_rules! bx_error {
    ( $( $t:tt )* ) => {
        tracing::error!($($t)*)
    };
}

macro_rules! bx_warn {
    ( $( $t:tt )* ) => {
        tracing::warn!($($t)*)
    };
}

macro_rules! bx_debug {
    ( $( $t:tt )* ) => {
        tracing::debug!($($t)*)
    };
}

macro_rules! bx_trace {
    ( $( $t:tt )* ) => {
        tracing::trace!($($t)*)
    };
}

pub(crate) use bx_debug;
pub(crate) use bx_error;
pub(crate) use bx_trace;
pub(crate) use bx_warn;
