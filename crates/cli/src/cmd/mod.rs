mod common;
mod export;
mod gc;
mod info;
mod install;

pub use common::{BuildArgs, GcArgs, ResolveArgs};
pub use export::cmd_export;
pub use gc::cmd_gc;
pub use info::cmd_info;
pub use install::cmd_install;
