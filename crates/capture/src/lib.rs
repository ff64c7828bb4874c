pub mod cdp;
pub mod discovery;
pub mod pipeline;

pub use cdp::{CdpTransport, EVENT_QUEUE_CAPACITY, MAX_FRAME_BYTES};
pub use discovery::{discover_target, list_page_targets};
pub use pipeline::{run_capture, run_capture_on};
