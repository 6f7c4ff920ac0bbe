mod add_count;
mod append_content;
mod monotonic_max;
mod overwrite;
mod reducer_registry;

pub use add_count::AddCount;
pub use append_content::AppendContent;
pub use monotonic_max::MonotonicMax;
pub use overwrite::Overwrite;
pub use reducer_registry::*;

use crate::node::NodePartial;
use crate::state::EssayState;

/// Every reducer folds one field of a `NodePartial` into `EssayState`.
pub trait Reducer: Send + Sync {
    fn apply(&self, state: &mut EssayState, update: &NodePartial);
}

#[cfg(test)]
mod tests;
