// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire format for the task backplane.
//!
//! JSON-RPC 2.0 envelopes (stdio and HTTP speak the same shapes), the tool
//! envelope every controller emits, the loose-typed parameter coercion
//! layer, and the response optimizer that shapes envelopes per profile.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod coerce;
mod envelope;
mod jsonrpc;
mod optimizer;

pub use envelope::{error_envelope, success_envelope, ToolCall};
pub use jsonrpc::{
    CodecError, JsonRpcError, JsonRpcRequest, JsonRpcResponse, JsonlCodec, INTERNAL_ERROR,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use optimizer::{
    OptimizationContext, OptimizerMetrics, ResponseOptimizer, ResponseProfile,
};
