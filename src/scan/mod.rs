//! Raster scan coordination.
//!
//! Control flow: [`ScanOrchestrator`] resolves channels through [`ScanResolver`],
//! runs [`PreScanInitializer`] once, then drives [`RowScanExecutor`] for each
//! slow-axis row in order.

pub mod channels;
pub mod events;
pub mod init;
pub mod orchestrator;
pub mod plan;
pub mod resolver;
pub mod row;

pub use channels::{ChannelLease, ChannelNames, ScanChannels};
pub use events::ScanEvent;
pub use init::PreScanInitializer;
pub use orchestrator::{CaptureFile, ScanOrchestrator, ScanReport};
pub use plan::{Axis, DetectorBufferingPlan, FileWriteMode, ScanConfig};
pub use resolver::ScanResolver;
pub use row::{CaptureRearm, RowPhase, RowScanExecutor, RowState};
