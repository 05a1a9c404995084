// Public modules and re-exports
pub mod binder;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod netlink;
pub mod packet;
pub mod queue;

pub use binder::{BindingInfo, DeviceInfo, InterfaceInfo, NetOps, PlatformNetOps};
pub use config::{Args, RouterConfig};
pub use dispatch::{DispatchLoop, DispatchStats, LoopExit, StatsSnapshot};
pub use engine::{Disposition, PacketEngine, RxFrame, XskConfig, XskEngine};
pub use error::{HandlerError, RestoreError, RestoreStep, RouterError};
pub use handler::{Handler, Rewriter};
pub use lifecycle::{DriverState, Router};
pub use packet::{Action, Frame, Metadata};
pub use queue::{QueueAdapter, Verdict};
