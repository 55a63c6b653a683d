//! Provenance graph builder.
//!
//! The pipeline, in order:
//!
//! 1. [`factory::TraceFactory`] builds a skeleton from the raw plan:
//!    operations, arguments, routing-correlated sources.
//! 2. The primary pass wires jobs, materializes parts
//!    ([`parts::PartMaterializer`]), and discovers files.
//! 3. The protocol profile ([`profiles`]) runs the ordered heuristic rule
//!    battery ([`rules`]).
//! 4. The structural patch pass ([`patch`]) prunes file sources, infers
//!    collection sources from parts, and prefixes file names.
//! 5. [`check::check_trace`] reports remaining gaps; it never repairs.
//!
//! Everything is synchronous and single-threaded; the one mutable `Trace`
//! is threaded through each pass in turn.

pub mod check;
pub mod factory;
pub mod parts;
pub mod patch;
pub mod profiles;
pub mod rules;
pub mod visitor;

pub use check::{check_trace, CheckVisitor};
pub use factory::{BuildError, BuildOptions, TraceFactory};
pub use parts::PartMaterializer;
pub use profiles::{profile_for, standard_battery, ChallengeProblem, PlanTagVisitor};
pub use rules::{ProtocolRule, RuleStep};
pub use visitor::{
    apply_visitor, BatchVisitor, EntityResolver, NullResolver, TraceVisitor, VisitCx,
};
