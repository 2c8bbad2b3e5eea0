//! Load-balancer pool compilation

pub mod compiler;
pub mod profile;

pub use compiler::{compile, compile_all, CompileContext, CompiledPool, PoolBatch, PoolMember};
pub use profile::{MemberSlot, PoolProfile, PoolSpec};
