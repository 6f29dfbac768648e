pub mod debounce;
pub mod dispatcher;
pub mod edge_hub;
pub mod lifecycle;
pub mod registry;

pub use crate::domain::model::{BoardTable, ButtonSpec, ChannelId, LedId, LedSpec, LineId};
pub use crate::domain::ports::{ActionLauncher, EdgeNotifier, EdgeSource, LineManager};
pub use crate::utils::error::Result;
