//! Compatibility layer for code that still reads and writes bare globals
//! (`globalData`, `loadedFitFiles`, ...) instead of going through the store.

pub mod bridge;
pub mod scope;

pub use bridge::{CommitFn, DEFAULT_BINDINGS, LegacyBinding, LegacyBridge, ReentrancyGuard};
pub use scope::{GlobalScope, PropertyKind, ScopeError};
