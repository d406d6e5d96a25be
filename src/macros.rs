#![allow(unused_macros)]

// Logging shims: forward to `tracing` when the feature is on, otherwise
// type-check the arguments and drop them.

macro_rules! trace {
    ($($t:tt)*) => {
        msl_log!(trace, $($t)*)
    }
}

macro_rules! debug {
    ($($t:tt)*) => {
        msl_log!(debug, $($t)*)
    }
}

macro_rules! info {
    ($($t:tt)*) => {
        msl_log!(info, $($t)*)
    }
}

macro_rules! warn {
    ($($t:tt)*) => {
        msl_log!(warn, $($t)*)
    }
}

macro_rules! error {
    ($($t:tt)*) => {
        msl_log!(error, $($t)*)
    }
}

macro_rules! msl_log {
    ($level: ident, $($t:tt)*) => {{
        #[cfg(feature = "tracing")]
        { ::tracing::$level!(target: "rsmsl", $($t)*) }
        #[cfg(not(feature = "tracing"))]
        { if false { let _ = format_args!($($t)*); } }
    }}
}
