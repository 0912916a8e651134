//! Chariot scripting language
//!
//! A small call-syntax language meant to be embedded in a host process. Scripts
//! are sequences of calls (`setq(x, add(x, 1))`) and function literals
//! (`func() { ... }`) evaluated by a tree-walking [`runtime::Runtime`].
//!
//! Hosts extend the language by registering [`runtime::BuiltinFunction`]s and by
//! passing opaque [`runtime::HostObject`]s through script values.

pub mod ast;
pub mod parser;
pub mod runtime;

pub use runtime::{
    Arity, BuiltinFunction, CallContext, Closure, HostObject, Runtime, RuntimeError,
    RuntimeResult, Scope, Value,
};
