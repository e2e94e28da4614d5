//! # Productions
//!
//! Behaviour that lives in the store.
//!
//! Each production kind installs one or more watches and describes itself
//! with facts, so a client can discover what is installed by querying:
//!
//! - `rule`: declarative rewrite, `WHERE`/`NAC` to `PRODUCE`
//! - `aggregate`: versioned reductions over `ITEM` facts with `REFINES` chains
//! - `compute`: arithmetic and comparison operators over `X`/`Y` facts
//! - `effect`: named side effects, synchronous or deferred to `Graph::settle`
//! - `describe`: the `TYPE`/`DOCS`/`CATEGORY` vocabulary shared by all of them

pub mod aggregate;
pub mod compute;
pub mod describe;
pub mod effect;
pub mod rule;
