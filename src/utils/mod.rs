//! Higher-level template constructors built on top of the core engine:
//! parameterized families and memoized selectors. Both are thin sugar over
//! [`crate::template::atom`] plus [`crate::injection::Injection`] hooks, not
//! separate engine concepts — see each submodule's doc comment.

pub mod atom_family;
pub mod select_atom;
