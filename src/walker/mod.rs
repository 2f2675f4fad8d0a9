//! Shared traversal helpers used by the rules

pub mod chain;
pub mod containment;

pub use chain::{
    bound_arguments, chain_root, downstream, is_materializing_constructor, receiver_of,
    upstream_calls, walk_upstream, Upstream,
};
pub use containment::{enclosing_loop, is_in_loop};
