//! Core of the Lode object relational mapper: the expression algebra and
//! its dialect-forkable compiler, typed variables, identity-mapped stores,
//! result sets, references, tracers and caches.

mod cache;
mod compile;
mod database;
mod error;
mod event;
mod expr;
mod info;
mod interval;
mod memory;
mod parse;
mod properties;
mod reference;
mod result_set;
mod store;
mod tracer;
mod uri;
mod value;
mod variable;

pub use cache::*;
pub use compile::*;
pub use database::*;
pub use error::*;
pub use event::*;
pub use expr::*;
pub use info::*;
pub use interval::*;
pub use memory::*;
pub use parse::*;
pub use properties::*;
pub use reference::*;
pub use result_set::*;
pub use store::*;
pub use tracer::*;
pub use uri::*;
pub use value::*;
pub use variable::*;
