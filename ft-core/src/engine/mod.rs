//! Fan curve engine

pub mod curve;

pub use curve::{
    apply_response_time, interpolate, interpolate_linear, normalize_curve, validate_curve,
};
